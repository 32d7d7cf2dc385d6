//! Turning adjusted closing prices into the annualized return statistics the
//! simulation engine consumes.
//!
//! Prices arrive in long format (one row per date and ticker), get pivoted into a
//! dates × assets table, differenced into period-over-period percentage changes and
//! finally reduced to a mean vector and a sample covariance matrix, both scaled by
//! the number of periods per year.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::TRADING_PERIODS_PER_YEAR;

#[derive(Error, Debug)]
pub enum StatisticsError {
    #[error("No assets were requested.")]
    NoAssets,
    #[error("Asset `{0}` is listed more than once.")]
    DuplicateAsset(String),
    #[error("Found two prices for `{ticker}` on {date}.")]
    DuplicatePrice { ticker: String, date: NaiveDate },
    #[error("Need at least {required} complete dates, got {available}.")]
    InsufficientHistory { required: usize, available: usize },
    #[error("Non-positive or non-finite price {price} for `{ticker}` on {date}.")]
    InvalidPrice {
        ticker: String,
        date: NaiveDate,
        price: f64,
    },
    #[error("`{value}` is not a `YYYY-MM-DD` date: {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("Lookback window starts ({start}) after it ends ({end}).")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },
    #[error("Statistics dimensions disagree: {0}")]
    DimensionMismatch(String),
}

/// Adjusted closing price of one ticker on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    /// Serialized as ISO `YYYY-MM-DD`.
    pub date: NaiveDate,
    pub ticker: String,
    pub adj_close: f64,
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl LookbackWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, StatisticsError> {
        if start > end {
            return Err(StatisticsError::InvalidWindow { start, end });
        }
        Ok(LookbackWindow { start, end })
    }

    /// Window from two ISO `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, StatisticsError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, StatisticsError> {
    NaiveDate::from_str(value.trim()).map_err(|source| StatisticsError::InvalidDate {
        value: value.to_string(),
        source,
    })
}

/// Source of historical prices. Network-backed market data clients implement this
/// outside the crate.
pub trait PriceProvider {
    fn adjusted_closes(
        &self,
        assets: &[String],
        window: &LookbackWindow,
    ) -> Result<Vec<PriceRow>, StatisticsError>;
}

/// Serves prices already held in memory (e.g. loaded from a JSON file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryPriceProvider {
    rows: Vec<PriceRow>,
}

impl InMemoryPriceProvider {
    pub fn new(rows: Vec<PriceRow>) -> Self {
        InMemoryPriceProvider { rows }
    }
}

impl PriceProvider for InMemoryPriceProvider {
    fn adjusted_closes(
        &self,
        assets: &[String],
        window: &LookbackWindow,
    ) -> Result<Vec<PriceRow>, StatisticsError> {
        let wanted: HashSet<&str> = assets.iter().map(String::as_str).collect();
        Ok(self
            .rows
            .iter()
            .filter(|row| wanted.contains(row.ticker.as_str()) && window.contains(row.date))
            .cloned()
            .collect())
    }
}

/// Prices laid out as dates (ascending) × assets (in asset order). Only built by
/// [`PriceTable::pivot`], so every price is finite and positive.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    assets: Vec<String>,
    dates: Vec<NaiveDate>,
    /// `prices[t][i]` is the price of `assets[i]` on `dates[t]`.
    prices: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Pivots long-format rows into a dates × assets table.
    ///
    /// Rows outside `window` or for tickers not in `assets` are ignored. Dates that
    /// miss a price for any asset are dropped, since a return needs both endpoints.
    pub fn pivot(
        rows: &[PriceRow],
        assets: &[String],
        window: &LookbackWindow,
    ) -> Result<Self, StatisticsError> {
        validate_assets(assets)?;
        let column_of: HashMap<&str, usize> = assets
            .iter()
            .enumerate()
            .map(|(i, asset)| (asset.as_str(), i))
            .collect();

        let mut by_date: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        for row in rows.iter().filter(|row| window.contains(row.date)) {
            let Some(&column) = column_of.get(row.ticker.as_str()) else {
                continue;
            };
            if !row.adj_close.is_finite() || row.adj_close <= 0. {
                return Err(StatisticsError::InvalidPrice {
                    ticker: row.ticker.clone(),
                    date: row.date,
                    price: row.adj_close,
                });
            }
            let slot = &mut by_date
                .entry(row.date)
                .or_insert_with(|| vec![None; assets.len()])[column];
            if slot.is_some() {
                return Err(StatisticsError::DuplicatePrice {
                    ticker: row.ticker.clone(),
                    date: row.date,
                });
            }
            *slot = Some(row.adj_close);
        }

        let mut dates = Vec::with_capacity(by_date.len());
        let mut prices = Vec::with_capacity(by_date.len());
        let mut incomplete = 0usize;
        for (date, row) in by_date {
            match row.into_iter().collect::<Option<Vec<f64>>>() {
                Some(complete) => {
                    dates.push(date);
                    prices.push(complete);
                }
                None => incomplete += 1,
            }
        }
        if incomplete > 0 {
            warn!(
                "Dropped {} date(s) with missing prices between {} and {}.",
                incomplete, window.start, window.end
            );
        }

        // two returns are the minimum for a sample covariance
        if dates.len() < 3 {
            return Err(StatisticsError::InsufficientHistory {
                required: 3,
                available: dates.len(),
            });
        }

        debug!(
            "Pivoted {} dates for {} assets.",
            dates.len(),
            assets.len()
        );
        Ok(PriceTable {
            assets: assets.to_vec(),
            dates,
            prices,
        })
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn prices(&self) -> &[Vec<f64>] {
        &self.prices
    }

    /// Period-over-period percentage changes, `p_t / p_{t-1} - 1`.
    /// The first date has no predecessor and produces no row. A previous price that
    /// is not finite and positive is an error.
    pub fn pct_change(&self) -> Result<Vec<Vec<f64>>, StatisticsError> {
        self.prices
            .windows(2)
            .zip(&self.dates)
            .map(|(pair, &date)| {
                pair[1]
                    .iter()
                    .zip(pair[0].iter())
                    .zip(&self.assets)
                    .map(|((current, &previous), ticker)| {
                        if !previous.is_finite() || previous <= 0. {
                            return Err(StatisticsError::InvalidPrice {
                                ticker: ticker.clone(),
                                date,
                                price: previous,
                            });
                        }
                        Ok(current / previous - 1.)
                    })
                    .collect::<Result<Vec<f64>, StatisticsError>>()
            })
            .collect()
    }
}

/// Annualized mean returns and covariance, aligned to `assets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatistics {
    pub returns_annual: Vec<f64>,
    pub cov_annual: Vec<Vec<f64>>,
}

impl ReturnStatistics {
    /// Builds statistics from already-computed values, checking only that the
    /// shapes agree with each other.
    pub fn new(returns_annual: Vec<f64>, cov_annual: Vec<Vec<f64>>) -> Result<Self, StatisticsError> {
        let n = returns_annual.len();
        if cov_annual.len() != n || cov_annual.iter().any(|row| row.len() != n) {
            return Err(StatisticsError::DimensionMismatch(format!(
                "{} mean returns but a {}-row covariance matrix with row lengths {:?}",
                n,
                cov_annual.len(),
                cov_annual.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }
        Ok(ReturnStatistics {
            returns_annual,
            cov_annual,
        })
    }

    /// Mean and sample covariance of the table's percentage changes, scaled by
    /// `periods_per_year`.
    pub fn from_prices(table: &PriceTable, periods_per_year: f64) -> Result<Self, StatisticsError> {
        let period_returns = table.pct_change()?;
        let n = table.assets.len();

        // one column per asset
        let columns: Vec<Vec<f64>> = (0..n)
            .map(|i| period_returns.iter().map(|row| row[i]).collect())
            .collect();

        let returns_annual = columns
            .iter()
            .map(|column| column.iter().mean() * periods_per_year)
            .collect();

        let mut cov_annual = vec![vec![0.; n]; n];
        for i in 0..n {
            for j in i..n {
                let covariance =
                    columns[i].iter().covariance(columns[j].iter()) * periods_per_year;
                cov_annual[i][j] = covariance;
                cov_annual[j][i] = covariance;
            }
        }

        Ok(ReturnStatistics {
            returns_annual,
            cov_annual,
        })
    }

    /// Fetches prices from `provider` and reduces them with the default 250 periods a year.
    pub fn from_provider<P: PriceProvider + ?Sized>(
        provider: &P,
        assets: &[String],
        window: &LookbackWindow,
    ) -> Result<Self, StatisticsError> {
        let rows = provider.adjusted_closes(assets, window)?;
        let table = PriceTable::pivot(&rows, assets, window)?;
        Self::from_prices(&table, TRADING_PERIODS_PER_YEAR)
    }

    pub fn asset_count(&self) -> usize {
        self.returns_annual.len()
    }
}

fn validate_assets(assets: &[String]) -> Result<(), StatisticsError> {
    if assets.is_empty() {
        return Err(StatisticsError::NoAssets);
    }
    let mut seen = HashSet::with_capacity(assets.len());
    for asset in assets {
        if !seen.insert(asset.as_str()) {
            return Err(StatisticsError::DuplicateAsset(asset.clone()));
        }
    }
    Ok(())
}
