//! Distance between observed and simulated trajectories.

use crate::model::Trajectory;

/// Euclidean norm of the elementwise difference of two trajectories.
///
/// All numeric columns (time, coral, starfish) of every row are flattened
/// into a single vector. Returns `None` when the trajectories are not
/// comparable (empty, truncated or on different grids) or the result is
/// not finite; samplers treat that as a rejected proposal.
pub fn distance(obs: &Trajectory, sim: &Trajectory) -> Option<f64> {
    if obs.is_empty() || obs.len() != sim.len() {
        return None;
    }

    let sum_sq: f64 = obs
        .rows
        .iter()
        .zip(&sim.rows)
        .map(|(a, b)| {
            let d_time = a.time - b.time;
            let d_coral = a.coral as f64 - b.coral as f64;
            let d_starfish = a.starfish as f64 - b.starfish as f64;
            d_time * d_time + d_coral * d_coral + d_starfish * d_starfish
        })
        .sum();

    let dist = sum_sq.sqrt();
    dist.is_finite().then_some(dist)
}

/// Distance with undefined values mapped to `+inf`.
pub fn distance_or_inf(obs: &Trajectory, sim: &Trajectory) -> f64 {
    distance(obs, sim).unwrap_or(f64::INFINITY)
}
