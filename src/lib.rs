// Modules
pub mod consts;
pub mod portfolio;
pub mod report;
pub mod run;
pub mod sampling;
pub mod simulation;
pub mod statistics;

pub use portfolio::{Degeneracy, SimulatedPortfolio};
pub use report::{PopulationSummary, PopulationTable, SelectionReport};
pub use sampling::WeightSampler;
pub use simulation::{
    simulate, ExecutionMode, SimulationConfig, SimulationEngine, SimulationError, SimulationResult,
};
pub use statistics::{
    InMemoryPriceProvider, LookbackWindow, PriceProvider, PriceRow, PriceTable, ReturnStatistics,
    StatisticsError,
};
