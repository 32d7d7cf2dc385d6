//! A complete run described in one JSON document: which assets, where their
//! statistics come from, and how to simulate.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::report::SelectionReport;
use crate::simulation::{SimulationConfig, SimulationEngine, SimulationResult};
use crate::statistics::{InMemoryPriceProvider, LookbackWindow, PriceRow, ReturnStatistics};

/// Exactly one of `prices` (with `window`) or `statistics` must be present.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunFile {
    pub assets: Vec<String>,
    #[serde(default)]
    pub window: Option<LookbackWindow>,
    #[serde(default)]
    pub prices: Option<Vec<PriceRow>>,
    #[serde(default)]
    pub statistics: Option<ReturnStatistics>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RunFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read run file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid run file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Resolves the return statistics, computing them from prices when needed.
    pub fn statistics(&self) -> Result<ReturnStatistics> {
        match (&self.prices, &self.statistics) {
            (Some(_), Some(_)) => bail!("give either `prices` or `statistics`, not both"),
            (None, None) => bail!("one of `prices` or `statistics` is required"),
            (None, Some(statistics)) => Ok(ReturnStatistics::new(
                statistics.returns_annual.clone(),
                statistics.cov_annual.clone(),
            )?),
            (Some(rows), None) => {
                let window = self
                    .window
                    .as_ref()
                    .context("`window` is required when `prices` are given")?;
                let window = LookbackWindow::new(window.start, window.end)?;
                let provider = InMemoryPriceProvider::new(rows.clone());
                info!(
                    "Building statistics from {} price rows ({} to {}).",
                    rows.len(),
                    window.start,
                    window.end
                );
                Ok(ReturnStatistics::from_provider(
                    &provider,
                    &self.assets,
                    &window,
                )?)
            }
        }
    }

    pub fn execute(&self) -> Result<SimulationResult> {
        let statistics = self.statistics()?;
        let engine = SimulationEngine::from_statistics(
            self.assets.clone(),
            &statistics,
            self.simulation.clone(),
        )?;
        Ok(engine.run())
    }
}

/// Human-readable summary: the min-volatility and max-sharpe portfolios (all ties),
/// the frontier size and population summary.
pub struct RunReport<'a>(pub &'a SimulationResult);

impl fmt::Display for RunReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        for portfolio in result.min_volatility_portfolios() {
            let report = SelectionReport::new("Minimum Volatility", &result.assets, portfolio);
            writeln!(f, "{report}")?;
        }
        for portfolio in result.max_sharpe_portfolios() {
            let report = SelectionReport::new("Maximum Sharpe Ratio", &result.assets, portfolio);
            writeln!(f, "{report}")?;
        }

        let summary = result.summary();
        writeln!(
            f,
            "{} portfolios, {} on the efficient frontier, {} degenerate",
            result.population.len(),
            result.efficient_frontier.len(),
            result.degenerate_trials
        )?;
        writeln!(
            f,
            "average return {:.6}, average volatility {:.6}, average sharpe {:.6}",
            summary.population_average_return,
            summary.population_average_volatility,
            summary.population_average_sharpe
        )
    }
}

pub fn render(result: &SimulationResult) -> String {
    RunReport(result).to_string()
}
