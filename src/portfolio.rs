use serde::{Deserialize, Deserializer, Serialize};

/// Why a trial's metrics could not be computed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degeneracy {
    /// `wᵗΣw` came out clearly negative, which means the covariance matrix is not
    /// positive semi-definite. Volatility and sharpe ratio are NaN.
    NegativeVariance,
    /// Volatility is (numerically) zero, so the sharpe ratio is undefined and set to NaN.
    ZeroVolatility,
}

/// One sampled allocation and the metrics derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedPortfolio {
    /// Position of this record in generation order.
    pub trial: usize,
    pub weights: Vec<f64>,
    #[serde(deserialize_with = "metric_or_nan")]
    pub expected_return: f64,
    #[serde(deserialize_with = "metric_or_nan")]
    pub volatility: f64,
    #[serde(deserialize_with = "metric_or_nan")]
    pub sharpe_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degeneracy: Option<Degeneracy>,
}

/// `serde_json` writes NaN metrics as `null`; read them back as NaN.
fn metric_or_nan<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl SimulatedPortfolio {
    pub fn is_degenerate(&self) -> bool {
        self.degeneracy.is_some()
    }

    /// Scores where bigger is better: return is maximized, volatility minimized.
    fn scores(&self) -> [f64; 2] {
        [self.expected_return, -self.volatility]
    }

    /// `self` is dominated by `other` if `other` is at least as good on every
    /// objective AND strictly better on at least one.
    pub fn is_dominated_by(&self, other: &SimulatedPortfolio) -> bool {
        let self_metrics = self.scores();
        let other_metrics = other.scores();

        let other_is_at_least_as_good_in_all = self_metrics
            .iter()
            .zip(other_metrics.iter())
            .all(|(&self_metric, &other_metric)| other_metric >= self_metric);

        let other_is_strictly_better_in_one = self_metrics
            .iter()
            .zip(other_metrics.iter())
            .any(|(&self_metric, &other_metric)| other_metric > self_metric);

        other_is_at_least_as_good_in_all && other_is_strictly_better_in_one
    }
}
