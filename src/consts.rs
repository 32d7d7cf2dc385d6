/// Risk-free rate used when the caller does not supply one.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.05;
pub const DEFAULT_NUM_PORTFOLIOS: usize = 50_000;
pub const DEFAULT_SEED: u64 = 101;

/// Trading periods used to annualize daily statistics.
pub const TRADING_PERIODS_PER_YEAR: f64 = 250.;

/// Tolerance for weight sums, symmetry checks and generic float equality.
pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Variances above `-VARIANCE_EPSILON` are treated as floating error and clamped to zero.
/// Volatilities below it are considered zero.
pub const VARIANCE_EPSILON: f64 = 1e-12;
