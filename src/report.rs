use std::fmt;

use itertools::izip;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::portfolio::SimulatedPortfolio;

pub const RETURNS_COLUMN: &str = "Returns";
pub const VOLATILITY_COLUMN: &str = "Volatility";
pub const SHARPE_RATIO_COLUMN: &str = "Sharpe Ratio";

pub fn weight_column(asset: &str) -> String {
    format!("{asset} weight")
}

/// The population laid out the way a plotting or reporting sink expects it:
/// `Returns`, `Volatility`, `Sharpe Ratio`, then one `<asset> weight` column per
/// asset in asset order. Rows follow generation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl PopulationTable {
    pub fn from_population(assets: &[String], population: &[SimulatedPortfolio]) -> Self {
        let columns = [RETURNS_COLUMN, VOLATILITY_COLUMN, SHARPE_RATIO_COLUMN]
            .into_iter()
            .map(String::from)
            .chain(assets.iter().map(|asset| weight_column(asset)))
            .collect();

        let rows = population
            .par_iter()
            .map(|portfolio| {
                [
                    portfolio.expected_return,
                    portfolio.volatility,
                    portfolio.sharpe_ratio,
                ]
                .into_iter()
                .chain(portfolio.weights.iter().copied())
                .collect::<Vec<f64>>()
            })
            .collect();

        PopulationTable { columns, rows }
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Per-column (min, max) over finite values, e.g. for plot axes.
    /// A column with no finite value yields `(INFINITY, NEG_INFINITY)`.
    pub fn column_ranges(&self) -> Vec<(f64, f64)> {
        // must start this way so that any value is less than INFINITY and bigger than NEG_INFINITY
        let mut min_max = vec![(f64::INFINITY, f64::NEG_INFINITY); self.columns.len()];

        for row in self.rows.iter() {
            for (col_idx, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    continue;
                }
                let (min, max) = &mut min_max[col_idx];
                *min = (*min).min(value);
                *max = (*max).max(value);
            }
        }
        min_max
    }
}

/// Transposed view of one selected record: one `(column, value)` line per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub label: String,
    pub trial: usize,
    pub entries: Vec<(String, f64)>,
}

impl SelectionReport {
    pub fn new(label: impl Into<String>, assets: &[String], portfolio: &SimulatedPortfolio) -> Self {
        let mut entries = vec![
            (RETURNS_COLUMN.to_string(), portfolio.expected_return),
            (VOLATILITY_COLUMN.to_string(), portfolio.volatility),
            (SHARPE_RATIO_COLUMN.to_string(), portfolio.sharpe_ratio),
        ];
        entries.extend(
            izip!(assets, &portfolio.weights).map(|(asset, &weight)| (weight_column(asset), weight)),
        );

        SelectionReport {
            label: label.into(),
            trial: portfolio.trial,
            entries,
        }
    }
}

impl fmt::Display for SelectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .entries
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        writeln!(f, "{} (trial {})", self.label, self.trial)?;
        for (name, value) in &self.entries {
            writeln!(f, "  {name:<width$}  {value:>12.6}")?;
        }
        Ok(())
    }
}

/// Contains summary statistics for a simulated population.
/// Records with a non-finite metric are left out of that metric's statistics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopulationSummary {
    /// Best (highest) expected return in the population.
    pub best_return: f64,
    /// Average expected return across the population.
    pub population_average_return: f64,
    /// Best (lowest) volatility in the population.
    pub best_volatility: f64,
    /// Average volatility across the population.
    pub population_average_volatility: f64,
    /// Best (highest) sharpe ratio in the population.
    pub best_sharpe: f64,
    /// Average sharpe ratio across the population.
    pub population_average_sharpe: f64,
}

impl PopulationSummary {
    pub fn from_population(population: &[SimulatedPortfolio]) -> Self {
        let returns = finite_values(population, |p| p.expected_return);
        let volatilities = finite_values(population, |p| p.volatility);
        let sharpe_ratios = finite_values(population, |p| p.sharpe_ratio);

        let best_return = returns
            .par_iter()
            .fold(|| f64::NEG_INFINITY, |a, &b| a.max(b))
            .reduce(|| f64::NEG_INFINITY, |a, b| a.max(b));
        let best_volatility = volatilities
            .par_iter()
            .fold(|| f64::INFINITY, |a, &b| a.min(b))
            .reduce(|| f64::INFINITY, |a, b| a.min(b));
        let best_sharpe = sharpe_ratios
            .par_iter()
            .fold(|| f64::NEG_INFINITY, |a, &b| a.max(b))
            .reduce(|| f64::NEG_INFINITY, |a, b| a.max(b));

        PopulationSummary {
            best_return,
            population_average_return: average(&returns),
            best_volatility,
            population_average_volatility: average(&volatilities),
            best_sharpe,
            population_average_sharpe: average(&sharpe_ratios),
        }
    }
}

fn finite_values<F>(population: &[SimulatedPortfolio], metric: F) -> Vec<f64>
where
    F: Fn(&SimulatedPortfolio) -> f64 + Sync + Send,
{
    population
        .par_iter()
        .map(|p| metric(p))
        .filter(|value| value.is_finite())
        .collect()
}

// Summed in population order so the result does not depend on rayon's splits.
// NaN for an empty slice.
fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
