//! Picking distinguished records out of a simulated population.
//!
//! Ties are exact: every record equal to the extremum is returned, in generation
//! order. Records whose metric is not finite (see `Degeneracy`) are never selected.

use std::cmp::Ordering;

use crate::portfolio::SimulatedPortfolio;

/// Indices of all records sharing the highest finite sharpe ratio.
pub fn max_sharpe_indices(population: &[SimulatedPortfolio]) -> Vec<usize> {
    extremum_indices(population, |p| p.sharpe_ratio, Ordering::Greater)
}

/// Indices of all records sharing the lowest finite volatility.
pub fn min_volatility_indices(population: &[SimulatedPortfolio]) -> Vec<usize> {
    extremum_indices(population, |p| p.volatility, Ordering::Less)
}

/// Single pass reduction. `better` is the ordering a candidate must have against
/// the current best to replace it.
fn extremum_indices<F>(population: &[SimulatedPortfolio], metric: F, better: Ordering) -> Vec<usize>
where
    F: Fn(&SimulatedPortfolio) -> f64,
{
    let mut best = f64::NAN;
    let mut indices = Vec::new();

    for (i, portfolio) in population.iter().enumerate() {
        let value = metric(portfolio);
        if !value.is_finite() {
            continue;
        }
        match value.partial_cmp(&best) {
            // `best` is NaN until the first finite value is seen
            None => {
                best = value;
                indices = vec![i];
            }
            Some(Ordering::Equal) => indices.push(i),
            Some(ordering) if ordering == better => {
                best = value;
                indices.clear();
                indices.push(i);
            }
            Some(_) => {}
        }
    }
    indices
}

/// Finds the indices of records that no other record dominates in
/// (higher expected return, lower volatility).
///
/// After sorting by ascending volatility (then descending return), a candidate is
/// dominated by some record iff it is dominated by the last frontier point, whose
/// return is the running maximum. One sweep keeps this O(N log N), which matters
/// for populations in the tens of thousands.
///
/// # Returns
/// Indices ordered by ascending volatility, i.e. along the frontier from the
/// minimum-volatility end.
pub fn efficient_frontier_indices(population: &[SimulatedPortfolio]) -> Vec<usize> {
    let mut candidates: Vec<usize> = population
        .iter()
        .enumerate()
        .filter(|(_, p)| p.volatility.is_finite() && p.expected_return.is_finite())
        .map(|(i, _)| i)
        .collect();

    // ascending volatility, then descending return
    candidates.sort_by(|&a, &b| {
        let (pa, pb) = (&population[a], &population[b]);
        pa.volatility
            .total_cmp(&pb.volatility)
            .then(pb.expected_return.total_cmp(&pa.expected_return))
            .then(a.cmp(&b))
    });

    let mut frontier: Vec<usize> = Vec::new();
    for i in candidates {
        // exact duplicates of the last point do not dominate it and are kept
        let dominated = frontier
            .last()
            .is_some_and(|&last| population[i].is_dominated_by(&population[last]));
        if !dominated {
            frontier.push(i);
        }
    }
    frontier
}
