//! Rejection ABC.

use crate::distance::distance_or_inf;
use crate::engine::Engine;
use crate::error::AbcError;
use crate::model::{Theta, Trajectory};
use crate::stats::quantile;
use crate::streams::StreamSeed;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::Open01;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Result of a rejection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionOutput {
    /// Adaptive tolerance: the requested quantile of all distances.
    pub tolerance: f64,
    /// Parameters whose distance fell strictly below the tolerance.
    pub accepted: Vec<Theta>,
    /// Distance of every draw, `+inf` where undefined.
    pub distances: Vec<f64>,
}

/// Draw from the independent uniform prior on `(0, 1)^3`.
pub fn sample_prior<R: Rng + ?Sized>(rng: &mut R) -> Theta {
    Theta::new(rng.sample(Open01), rng.sample(Open01), rng.sample(Open01))
}

/// Draw `n_draws` parameters from the prior, simulate each and keep those
/// closer to `obs` than the `quantile_prob` quantile of all distances.
///
/// # Errors
/// Returns [`AbcError::NoAcceptances`] if no draw falls below the tolerance.
pub fn run_rejection<R: Rng + ?Sized>(
    engine: &Engine,
    obs: &Trajectory,
    n_draws: usize,
    quantile_prob: f64,
    rng: &mut R,
) -> Result<RejectionOutput> {
    if n_draws == 0 {
        bail!("number of draws must be positive");
    }
    if !(quantile_prob > 0.0 && quantile_prob < 1.0) {
        bail!("quantile must be in (0, 1), but is {quantile_prob}");
    }

    let seed = StreamSeed::draw(rng);
    let draws: Vec<(Theta, f64)> = (0..n_draws)
        .into_par_iter()
        .map(|i_draw| {
            let mut rng = seed.stream(i_draw);
            let theta = sample_prior(&mut rng);
            let traj = engine.simulate(&theta, &mut rng);
            (theta, distance_or_inf(obs, &traj))
        })
        .collect();

    let distances: Vec<f64> = draws.iter().map(|&(_, dist)| dist).collect();
    let n_undefined = distances.iter().filter(|d| !d.is_finite()).count();
    if n_undefined > 0 {
        log::warn!("{n_undefined} of {n_draws} draws produced no comparable trajectory");
    }

    let tolerance = quantile(&distances, quantile_prob);
    let accepted: Vec<Theta> = draws
        .iter()
        .filter(|&&(_, dist)| dist < tolerance)
        .map(|&(theta, _)| theta)
        .collect();

    if accepted.is_empty() {
        bail!(AbcError::NoAcceptances { n_draws, tolerance });
    }
    log::info!(
        "accepted {} of {n_draws} draws (tolerance {tolerance:.4})",
        accepted.len()
    );

    Ok(RejectionOutput {
        tolerance,
        accepted,
        distances,
    })
}
