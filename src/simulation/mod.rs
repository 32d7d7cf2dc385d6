use std::collections::HashSet;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_NUM_PORTFOLIOS, DEFAULT_RISK_FREE_RATE, DEFAULT_SEED, FLOAT_COMPARISON_EPSILON,
    VARIANCE_EPSILON,
};
use crate::portfolio::{Degeneracy, SimulatedPortfolio};
use crate::report::{PopulationSummary, PopulationTable};
use crate::sampling::WeightSampler;
use crate::statistics::ReturnStatistics;

pub mod selection;

use self::selection::{efficient_frontier_indices, max_sharpe_indices, min_volatility_indices};

/// Input problems detected before any trial runs. These abort the simulation;
/// numeric trouble inside a trial is reported per record through [`Degeneracy`].
#[derive(Error, Debug, PartialEq)]
pub enum SimulationError {
    #[error("At least one asset is required.")]
    NoAssets,
    #[error("Asset `{0}` is listed more than once.")]
    DuplicateAsset(String),
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("Non-finite input: {0}")]
    NonFiniteInput(String),
    #[error("Covariance matrix is not symmetric at ({row}, {col}).")]
    AsymmetricCovariance { row: usize, col: usize },
    #[error("Number of portfolios cannot be zero.")]
    ZeroPortfolios,
    #[error("Parallel execution needs at least one worker.")]
    ZeroWorkers,
}

fn default_risk_free_rate() -> f64 {
    DEFAULT_RISK_FREE_RATE
}

fn default_num_portfolios() -> usize {
    DEFAULT_NUM_PORTFOLIOS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

/// How trials are scheduled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One generator consumed strictly in trial order.
    #[default]
    Sequential,
    /// Trials split into `workers` contiguous chunks on the rayon pool. Worker `k`
    /// draws from its own generator seeded with `seed ^ k`, so results are
    /// reproducible for a fixed worker count but differ from `Sequential`.
    Parallel {
        #[serde(default = "default_max_concurrency")]
        workers: usize,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_num_portfolios")]
    pub num_portfolios: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub execution: ExecutionMode,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            num_portfolios: DEFAULT_NUM_PORTFOLIOS,
            seed: DEFAULT_SEED,
            execution: ExecutionMode::Sequential,
        }
    }
}

/// Everything a run produces. The selections are indices into `population`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SimulationResult {
    pub assets: Vec<String>,
    /// One record per trial, in generation order.
    pub population: Vec<SimulatedPortfolio>,
    /// All records tied at the highest sharpe ratio.
    pub max_sharpe: Vec<usize>,
    /// All records tied at the lowest volatility.
    pub min_volatility: Vec<usize>,
    /// Records not dominated in (higher return, lower volatility), by ascending volatility.
    pub efficient_frontier: Vec<usize>,
    pub degenerate_trials: usize,
}

impl SimulationResult {
    pub fn max_sharpe_portfolios(&self) -> Vec<&SimulatedPortfolio> {
        self.resolve(&self.max_sharpe)
    }

    pub fn min_volatility_portfolios(&self) -> Vec<&SimulatedPortfolio> {
        self.resolve(&self.min_volatility)
    }

    pub fn efficient_frontier_portfolios(&self) -> Vec<&SimulatedPortfolio> {
        self.resolve(&self.efficient_frontier)
    }

    pub fn summary(&self) -> PopulationSummary {
        PopulationSummary::from_population(&self.population)
    }

    pub fn table(&self) -> PopulationTable {
        PopulationTable::from_population(&self.assets, &self.population)
    }

    fn resolve(&self, indices: &[usize]) -> Vec<&SimulatedPortfolio> {
        indices.iter().map(|&i| &self.population[i]).collect()
    }
}

/// Monte Carlo sampler of the feasible risk/return set for a fixed basket.
///
/// Inputs are validated once in the constructor; [`SimulationEngine::run`] cannot fail.
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    assets: Vec<String>,
    returns: DVector<f64>,
    covariance: DMatrix<f64>,
    config: SimulationConfig,
}

impl SimulationEngine {
    pub fn new(
        assets: Vec<String>,
        returns_annual: &[f64],
        cov_annual: &[Vec<f64>],
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        validate_inputs(&assets, returns_annual, cov_annual, &config)?;
        let n = assets.len();
        let returns = DVector::from_column_slice(returns_annual);
        let covariance = DMatrix::from_fn(n, n, |i, j| cov_annual[i][j]);

        Ok(SimulationEngine {
            assets,
            returns,
            covariance,
            config,
        })
    }

    pub fn from_statistics(
        assets: Vec<String>,
        statistics: &ReturnStatistics,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        Self::new(
            assets,
            &statistics.returns_annual,
            &statistics.cov_annual,
            config,
        )
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn run(&self) -> SimulationResult {
        let num_portfolios = self.config.num_portfolios;
        info!(
            "Simulating {} portfolios over {} assets (seed {}, {:?}).",
            num_portfolios,
            self.assets.len(),
            self.config.seed,
            self.config.execution
        );

        let population = match self.config.execution {
            ExecutionMode::Sequential => self.run_trials(0..num_portfolios, self.config.seed),
            ExecutionMode::Parallel { workers } => self.run_parallel(workers),
        };

        let degenerate_trials = population.iter().filter(|p| p.is_degenerate()).count();
        if degenerate_trials > 0 {
            warn!(
                "{} of {} trials were numerically degenerate. \
                 Check that the covariance matrix is positive semi-definite.",
                degenerate_trials, num_portfolios
            );
        }

        let max_sharpe = max_sharpe_indices(&population);
        let min_volatility = min_volatility_indices(&population);
        let efficient_frontier = efficient_frontier_indices(&population);
        debug!(
            "Selected {} max-sharpe and {} min-volatility portfolio(s); frontier has {} points.",
            max_sharpe.len(),
            min_volatility.len(),
            efficient_frontier.len()
        );

        SimulationResult {
            assets: self.assets.clone(),
            population,
            max_sharpe,
            min_volatility,
            efficient_frontier,
            degenerate_trials,
        }
    }

    fn run_parallel(&self, workers: usize) -> Vec<SimulatedPortfolio> {
        let total = self.config.num_portfolios;
        let workers = workers.min(total);
        let chunk_size = (total + workers - 1) / workers;
        let seed = self.config.seed;

        let chunks: Vec<Vec<SimulatedPortfolio>> = (0..workers)
            .into_par_iter()
            .map(|k| {
                let start = (k * chunk_size).min(total);
                let end = ((k + 1) * chunk_size).min(total);
                debug!("Worker {} runs trials {}..{}.", k, start, end);
                self.run_trials(start..end, seed ^ k as u64)
            })
            .collect();

        chunks.into_iter().flatten().collect()
    }

    fn run_trials(&self, trials: Range<usize>, seed: u64) -> Vec<SimulatedPortfolio> {
        let mut sampler = WeightSampler::new(seed);
        let n = self.assets.len();
        trials
            .map(|trial| {
                let weights = sampler.sample(n);
                self.evaluate(trial, weights)
            })
            .collect()
    }

    /// Computes return, volatility and sharpe ratio for one weight vector.
    fn evaluate(&self, trial: usize, weights: Vec<f64>) -> SimulatedPortfolio {
        let w = DVector::from_column_slice(&weights);
        let expected_return = w.dot(&self.returns);
        let variance = w.dot(&(&self.covariance * &w));

        let (volatility, sharpe_ratio, degeneracy) = if variance < -VARIANCE_EPSILON {
            (f64::NAN, f64::NAN, Some(Degeneracy::NegativeVariance))
        } else {
            // tiny negatives are rounding noise
            let volatility = variance.max(0.).sqrt();
            if volatility < VARIANCE_EPSILON {
                (volatility, f64::NAN, Some(Degeneracy::ZeroVolatility))
            } else {
                let premium = expected_return - self.config.risk_free_rate;
                (volatility, premium / volatility, None)
            }
        };

        SimulatedPortfolio {
            trial,
            weights,
            expected_return,
            volatility,
            sharpe_ratio,
            degeneracy,
        }
    }
}

/// Runs the simulation with an explicit risk-free rate, trial count and seed,
/// sequentially.
///
/// # Arguments
/// * `assets`: asset identifiers; weights are aligned to this order.
/// * `returns_annual`: expected annual return per asset.
/// * `cov_annual`: annual covariance matrix, `assets.len()` square and symmetric.
/// * `risk_free_rate`: subtracted from expected return in the sharpe ratio.
/// * `num_portfolios`: number of trials, must be positive.
/// * `seed`: generator seed; identical inputs and seed give an identical result.
///
/// # Returns
/// The full population and its optimal selections, or a `SimulationError` if the
/// inputs are malformed.
pub fn simulate(
    assets: &[String],
    returns_annual: &[f64],
    cov_annual: &[Vec<f64>],
    risk_free_rate: f64,
    num_portfolios: usize,
    seed: u64,
) -> Result<SimulationResult, SimulationError> {
    let config = SimulationConfig {
        risk_free_rate,
        num_portfolios,
        seed,
        execution: ExecutionMode::Sequential,
    };
    let engine = SimulationEngine::new(assets.to_vec(), returns_annual, cov_annual, config)?;
    Ok(engine.run())
}

fn validate_inputs(
    assets: &[String],
    returns_annual: &[f64],
    cov_annual: &[Vec<f64>],
    config: &SimulationConfig,
) -> Result<(), SimulationError> {
    if assets.is_empty() {
        return Err(SimulationError::NoAssets);
    }
    let mut seen = HashSet::with_capacity(assets.len());
    if let Some(duplicate) = assets.iter().find(|asset| !seen.insert(asset.as_str())) {
        return Err(SimulationError::DuplicateAsset(duplicate.clone()));
    }

    let n = assets.len();
    if returns_annual.len() != n {
        return Err(SimulationError::DimensionMismatch(format!(
            "{} assets but {} mean returns",
            n,
            returns_annual.len()
        )));
    }
    if cov_annual.len() != n {
        return Err(SimulationError::DimensionMismatch(format!(
            "{} assets but {} covariance rows",
            n,
            cov_annual.len()
        )));
    }
    if let Some((i, row)) = cov_annual.iter().enumerate().find(|(_, row)| row.len() != n) {
        return Err(SimulationError::DimensionMismatch(format!(
            "covariance row {} has {} columns, expected {}",
            i,
            row.len(),
            n
        )));
    }

    if config.num_portfolios == 0 {
        return Err(SimulationError::ZeroPortfolios);
    }
    if matches!(config.execution, ExecutionMode::Parallel { workers: 0 }) {
        return Err(SimulationError::ZeroWorkers);
    }

    if !config.risk_free_rate.is_finite() {
        return Err(SimulationError::NonFiniteInput(format!(
            "risk-free rate is {}",
            config.risk_free_rate
        )));
    }
    if let Some((i, r)) = returns_annual.iter().enumerate().find(|(_, r)| !r.is_finite()) {
        return Err(SimulationError::NonFiniteInput(format!(
            "mean return of `{}` is {}",
            assets[i], r
        )));
    }
    for i in 0..n {
        for j in 0..n {
            let value = cov_annual[i][j];
            if !value.is_finite() {
                return Err(SimulationError::NonFiniteInput(format!(
                    "covariance ({}, {}) is {}",
                    i, j, value
                )));
            }
            if j > i {
                let mirror = cov_annual[j][i];
                let scale = value.abs().max(mirror.abs()).max(1.);
                if (value - mirror).abs() > FLOAT_COMPARISON_EPSILON * scale {
                    return Err(SimulationError::AsymmetricCovariance { row: i, col: j });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_assets() -> (Vec<String>, Vec<f64>, Vec<Vec<f64>>) {
        (
            vec!["A".into(), "B".into()],
            vec![0.10, 0.20],
            vec![vec![0.04, 0.01], vec![0.01, 0.09]],
        )
    }

    #[test]
    fn test_population_size_and_weights() {
        let (assets, returns, cov) = two_assets();
        let result = simulate(&assets, &returns, &cov, 0.05, 1000, 101).unwrap();
        assert_eq!(result.population.len(), 1000);
        for (i, portfolio) in result.population.iter().enumerate() {
            assert_eq!(portfolio.trial, i);
            let sum: f64 = portfolio.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "Weights should sum to 1. Got {}", sum);
            assert!(portfolio.weights.iter().all(|&w| w >= 0.0));
            assert!(portfolio.degeneracy.is_none());
        }
        assert_eq!(result.degenerate_trials, 0);
    }

    #[test]
    fn test_metrics_match_closed_form() {
        let (assets, returns, cov) = two_assets();
        let result = simulate(&assets, &returns, &cov, 0.05, 50, 9).unwrap();
        for p in &result.population {
            let (a, b) = (p.weights[0], p.weights[1]);
            let expected_return = 0.10 * a + 0.20 * b;
            let variance = 0.04 * a * a + 2. * 0.01 * a * b + 0.09 * b * b;
            assert!((p.expected_return - expected_return).abs() < 1e-12);
            assert!((p.volatility - variance.sqrt()).abs() < 1e-12);
            assert!((p.sharpe_ratio - (expected_return - 0.05) / variance.sqrt()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_determinism_and_seed_sensitivity() {
        let (assets, returns, cov) = two_assets();
        let first = simulate(&assets, &returns, &cov, 0.05, 1000, 101).unwrap();
        let second = simulate(&assets, &returns, &cov, 0.05, 1000, 101).unwrap();
        let other = simulate(&assets, &returns, &cov, 0.05, 1000, 202).unwrap();

        assert_eq!(first.population, second.population);
        assert_eq!(first.min_volatility, second.min_volatility);
        assert_eq!(
            first.min_volatility_portfolios(),
            second.min_volatility_portfolios()
        );
        assert_ne!(
            first.min_volatility_portfolios()[0].weights,
            other.min_volatility_portfolios()[0].weights
        );
    }

    #[test]
    fn test_selections_are_extremal() {
        let (assets, returns, cov) = two_assets();
        let result = simulate(&assets, &returns, &cov, 0.05, 2000, 5).unwrap();
        let best_sharpe = result.max_sharpe_portfolios()[0].sharpe_ratio;
        let lowest_volatility = result.min_volatility_portfolios()[0].volatility;
        for p in &result.population {
            assert!(best_sharpe >= p.sharpe_ratio);
            assert!(lowest_volatility <= p.volatility);
        }
    }

    #[test]
    fn test_single_trial_is_both_selections() {
        let (assets, returns, cov) = two_assets();
        let result = simulate(&assets, &returns, &cov, 0.05, 1, 101).unwrap();
        assert_eq!(result.population.len(), 1);
        assert_eq!(result.max_sharpe, vec![0]);
        assert_eq!(result.min_volatility, vec![0]);
        assert_eq!(result.efficient_frontier, vec![0]);
    }

    #[test]
    fn test_single_asset() {
        let assets = vec!["ONLY".to_string()];
        let result = simulate(&assets, &[0.12], &[vec![0.0625]], 0.05, 100, 3).unwrap();
        for p in &result.population {
            assert_eq!(p.weights, vec![1.0]);
            assert_eq!(p.expected_return, 0.12);
            assert_eq!(p.volatility, 0.0625_f64.sqrt());
        }
        // every record ties
        assert_eq!(result.max_sharpe.len(), 100);
        assert_eq!(result.min_volatility.len(), 100);
    }

    #[test]
    fn test_validation_errors() {
        let (assets, returns, cov) = two_assets();
        assert_eq!(
            simulate(&[], &[], &[], 0.05, 10, 1).unwrap_err(),
            SimulationError::NoAssets
        );
        assert!(matches!(
            simulate(&assets, &[0.1], &cov, 0.05, 10, 1),
            Err(SimulationError::DimensionMismatch(_))
        ));
        assert!(matches!(
            simulate(&assets, &returns, &[vec![0.04, 0.01]], 0.05, 10, 1),
            Err(SimulationError::DimensionMismatch(_))
        ));
        assert!(matches!(
            simulate(&assets, &returns, &[vec![0.04], vec![0.01, 0.09]], 0.05, 10, 1),
            Err(SimulationError::DimensionMismatch(_))
        ));
        assert_eq!(
            simulate(&assets, &returns, &cov, 0.05, 0, 1).unwrap_err(),
            SimulationError::ZeroPortfolios
        );
        assert_eq!(
            simulate(&assets, &returns, &[vec![0.04, 0.02], vec![0.01, 0.09]], 0.05, 10, 1)
                .unwrap_err(),
            SimulationError::AsymmetricCovariance { row: 0, col: 1 }
        );
        assert!(matches!(
            simulate(&assets, &[0.1, f64::NAN], &cov, 0.05, 10, 1),
            Err(SimulationError::NonFiniteInput(_))
        ));
        assert!(matches!(
            simulate(&assets, &returns, &cov, f64::INFINITY, 10, 1),
            Err(SimulationError::NonFiniteInput(_))
        ));
        assert!(matches!(
            simulate(&["A".into(), "A".into()], &returns, &cov, 0.05, 10, 1),
            Err(SimulationError::DuplicateAsset(_))
        ));

        let config = SimulationConfig {
            execution: ExecutionMode::Parallel { workers: 0 },
            ..SimulationConfig::default()
        };
        assert_eq!(
            SimulationEngine::new(assets, &returns, &cov, config).unwrap_err(),
            SimulationError::ZeroWorkers
        );
    }

    #[test]
    fn test_zero_variance_is_flagged() {
        let assets = vec!["CASH".to_string(), "STOCK".to_string()];
        let cov = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let result = simulate(&assets, &[0.03, 0.08], &cov, 0.05, 20, 11).unwrap();
        assert_eq!(result.population.len(), 20);
        assert_eq!(result.degenerate_trials, 20);
        assert!(result
            .population
            .iter()
            .all(|p| p.degeneracy == Some(Degeneracy::ZeroVolatility) && p.sharpe_ratio.is_nan()));
        // volatility is a valid zero, only the ratio is undefined
        assert!(result.max_sharpe.is_empty());
        assert_eq!(result.min_volatility.len(), 20);
    }

    #[test]
    fn test_degenerate_result_survives_json() {
        let assets = vec!["CASH".to_string(), "STOCK".to_string()];
        let cov = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        let result = simulate(&assets, &[0.03, 0.08], &cov, 0.05, 5, 11).unwrap();

        let json = serde_json::to_string(&result).unwrap();
        let back: SimulationResult = serde_json::from_str(&json).unwrap();

        assert_eq!(back.assets, result.assets);
        assert_eq!(back.max_sharpe, result.max_sharpe);
        assert_eq!(back.min_volatility, result.min_volatility);
        assert_eq!(back.efficient_frontier, result.efficient_frontier);
        assert_eq!(back.degenerate_trials, 5);
        for (read, written) in back.population.iter().zip(&result.population) {
            assert_eq!(read.weights, written.weights);
            assert_eq!(read.expected_return, written.expected_return);
            assert_eq!(read.volatility, written.volatility);
            assert!(read.sharpe_ratio.is_nan());
            assert_eq!(read.degeneracy, Some(Degeneracy::ZeroVolatility));
        }
    }

    #[test]
    fn test_indefinite_result_survives_json() {
        let assets = vec!["A".to_string(), "B".to_string()];
        let cov = vec![vec![0.01, -0.5], vec![-0.5, 0.01]];
        let result = simulate(&assets, &[0.1, 0.1], &cov, 0.05, 50, 1).unwrap();

        let back: SimulationResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        for (read, written) in back.population.iter().zip(&result.population) {
            assert_eq!(read.degeneracy, written.degeneracy);
            assert_eq!(read.volatility.is_nan(), written.volatility.is_nan());
            assert_eq!(read.sharpe_ratio.is_nan(), written.sharpe_ratio.is_nan());
        }
    }

    #[test]
    fn test_negative_variance_is_flagged() {
        let assets = vec!["A".to_string(), "B".to_string()];
        // symmetric but indefinite
        let cov = vec![vec![0.01, -0.5], vec![-0.5, 0.01]];
        let result = simulate(&assets, &[0.1, 0.1], &cov, 0.05, 200, 1).unwrap();
        assert_eq!(result.population.len(), 200);
        let negative = result
            .population
            .iter()
            .filter(|p| p.degeneracy == Some(Degeneracy::NegativeVariance))
            .count();
        assert!(negative > 0);
        for p in result.min_volatility_portfolios() {
            assert!(p.volatility.is_finite());
        }
    }

    #[test]
    fn test_parallel_is_reproducible_and_complete() {
        let (assets, returns, cov) = two_assets();
        let config = SimulationConfig {
            num_portfolios: 1001,
            execution: ExecutionMode::Parallel { workers: 4 },
            ..SimulationConfig::default()
        };
        let engine = SimulationEngine::new(assets, &returns, &cov, config).unwrap();
        let first = engine.run();
        let second = engine.run();
        assert_eq!(first.population.len(), 1001);
        assert_eq!(first.population, second.population);
        for (i, p) in first.population.iter().enumerate() {
            assert_eq!(p.trial, i);
        }

        // worker 0 shares the sequential seed, so the first chunk matches
        let sequential = simulate(engine.assets(), &returns, &cov, 0.05, 1001, 101).unwrap();
        assert_eq!(first.population[..251], sequential.population[..251]);
        assert_ne!(first.population[251..], sequential.population[251..]);
    }

    #[test]
    fn test_more_workers_than_trials() {
        let (assets, returns, cov) = two_assets();
        let config = SimulationConfig {
            num_portfolios: 3,
            execution: ExecutionMode::Parallel { workers: 16 },
            ..SimulationConfig::default()
        };
        let result = SimulationEngine::new(assets, &returns, &cov, config)
            .unwrap()
            .run();
        assert_eq!(result.population.len(), 3);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: SimulationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
        assert_eq!(config.seed, 101);
        assert_eq!(config.num_portfolios, 50_000);
        assert!((config.risk_free_rate - 0.05).abs() < f64::EPSILON);

        let config: SimulationConfig =
            serde_json::from_str(r#"{"seed": 7, "execution": {"Parallel": {}}}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert!(matches!(
            config.execution,
            ExecutionMode::Parallel { workers } if workers >= 1
        ));
    }
}
