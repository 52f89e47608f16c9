//! Adaptive SMC-ABC.
//!
//! Each generation perturbs every particle on the logit scale, simulates it
//! and weights it with a Gaussian kernel of the current tolerance. The
//! tolerance schedule starts at `min(median, tol_init)` and afterwards
//! follows `min(q_0.05 * scaling_factor, previous tolerance)`, so it never
//! increases. Populations whose effective sample size drops below the
//! threshold are resampled.

use crate::distance::distance_or_inf;
use crate::engine::Engine;
use crate::error::AbcError;
use crate::model::{Theta, Trajectory};
use crate::stats::{effective_sample_size, median, quantile};
use crate::streams::StreamSeed;
use crate::transform::Kernel;
use crate::utils::{check_num, check_theta};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::weighted::WeightedIndex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Quantile of the distances that drives the tolerance after generation 1.
const TOL_QUANTILE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct SmcSettings {
    pub n_particles: usize,
    pub n_generations: usize,
    pub tol_init: f64,
    pub scaling_factor: f64,
    pub ess_threshold: f64,
    pub theta_init: Theta,
}

impl SmcSettings {
    fn validate(&self) -> Result<()> {
        check_num(self.n_particles, 1..).context("invalid number of particles")?;
        check_num(self.n_generations, 1..).context("invalid number of generations")?;
        check_num(self.tol_init, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid initial tolerance")?;
        check_num(self.scaling_factor, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid scaling factor")?;
        check_num(self.ess_threshold, 0.0..=self.n_particles as f64)
            .context("invalid ESS threshold")?;
        check_theta(&self.theta_init).context("invalid initial parameters")?;
        Ok(())
    }
}

/// Final particle population and the realized schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmcOutput {
    pub particles: Vec<Theta>,
    pub weights: Vec<f64>,
    /// Tolerance used in each generation.
    pub tolerances: Vec<f64>,
    /// Effective sample size of each generation before resampling.
    pub ess: Vec<f64>,
    pub resampled: Vec<bool>,
}

/// Gaussian ABC kernel in log form; undefined distances get zero weight.
fn log_kernel_weight(dist: f64, tolerance: f64) -> f64 {
    if !dist.is_finite() {
        return f64::NEG_INFINITY;
    }
    if tolerance <= 0.0 {
        return if dist == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }
    -dist * dist / (2.0 * tolerance * tolerance)
}

/// Importance weights `w_i ~ exp(-d_i^2 / (2 eps^2))`, normalized.
///
/// Returns `None` if every weight is zero.
fn normalized_weights(distances: &[f64], tolerance: f64) -> Option<Vec<f64>> {
    let log_weights: Vec<f64> = distances
        .iter()
        .map(|&dist| log_kernel_weight(dist, tolerance))
        .collect();
    let max_log_weight = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_log_weight == f64::NEG_INFINITY {
        return None;
    }

    let mut weights: Vec<f64> = log_weights
        .iter()
        .map(|&lw| (lw - max_log_weight).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= sum);
    Some(weights)
}

/// Multinomial resampling proportional to `weights`.
fn resample<R: Rng + ?Sized>(
    particles: &[Theta],
    weights: &[f64],
    rng: &mut R,
) -> Result<Vec<Theta>> {
    let idx_dist =
        WeightedIndex::new(weights).context("failed to build resampling distribution")?;
    Ok((0..particles.len())
        .map(|_| particles[idx_dist.sample(rng)])
        .collect())
}

/// Run the sampler for `settings.n_generations` generations.
///
/// # Errors
/// Returns an error for invalid settings, and
/// [`AbcError::NoFiniteDistances`] if every particle of a generation
/// produced an undefined distance.
pub fn run_smc<R: Rng + ?Sized>(
    engine: &Engine,
    obs: &Trajectory,
    kernel: &Kernel,
    settings: &SmcSettings,
    rng: &mut R,
) -> Result<SmcOutput> {
    settings.validate().context("invalid SMC settings")?;

    let n_particles = settings.n_particles;
    let n_generations = settings.n_generations;

    let mut particles = vec![settings.theta_init; n_particles];
    let mut weights = vec![1.0 / n_particles as f64; n_particles];
    let mut tolerances = Vec::with_capacity(n_generations);
    let mut ess_vec = Vec::with_capacity(n_generations);
    let mut resampled = Vec::with_capacity(n_generations);
    let mut next_tolerance = settings.tol_init;

    for generation in 1..=n_generations {
        // Generation 1 perturbs the shared initial point; later ones
        // perturb every particle around its own value.
        let seed = StreamSeed::draw(rng);
        let proposals: Vec<(Theta, f64)> = particles
            .par_iter()
            .enumerate()
            .map(|(i_particle, theta)| {
                let mut rng = seed.stream(i_particle);
                let (_, _, theta_prop) = kernel.propose(theta, &mut rng);
                let traj = engine.simulate(&theta_prop, &mut rng);
                (theta_prop, distance_or_inf(obs, &traj))
            })
            .collect();
        let distances: Vec<f64> = proposals.iter().map(|&(_, dist)| dist).collect();

        let tolerance = if generation == 1 {
            median(&distances).min(settings.tol_init)
        } else {
            next_tolerance
        };

        let gen_weights = normalized_weights(&distances, tolerance)
            .ok_or(AbcError::NoFiniteDistances { generation })?;
        let ess = effective_sample_size(&gen_weights);

        let gen_particles: Vec<Theta> = proposals.iter().map(|&(theta, _)| theta).collect();
        let do_resample = ess < settings.ess_threshold;
        if do_resample {
            particles = resample(&gen_particles, &gen_weights, rng)
                .with_context(|| format!("failed to resample generation {generation}"))?;
            weights = vec![1.0 / n_particles as f64; n_particles];
        } else {
            particles = gen_particles;
            weights = gen_weights;
        }

        log::info!(
            "generation {generation}/{n_generations}: tolerance {tolerance:.4}, ESS {ess:.1}{}",
            if do_resample { ", resampled" } else { "" }
        );

        tolerances.push(tolerance);
        ess_vec.push(ess);
        resampled.push(do_resample);

        let candidate = quantile(&distances, TOL_QUANTILE) * settings.scaling_factor;
        next_tolerance = candidate.min(tolerance);
        log::debug!("next tolerance {next_tolerance:.4} (candidate {candidate:.4})");
    }

    Ok(SmcOutput {
        particles,
        weights,
        tolerances,
        ess: ess_vec,
        resampled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::State;
    use crate::stats::{Accumulator, summarize_weighted};
    use crate::transform::theta_to_phi;
    use nalgebra::Matrix3;
    use rand_chacha::ChaCha12Rng;

    fn setup() -> (Engine, Trajectory, Kernel) {
        let obs_times: Vec<f64> = (0..=10).map(|i| 2.0 * i as f64).collect();
        let engine = Engine::new(State::new(34, 16), obs_times, 100_000).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(31);
        let obs = engine.simulate(&Theta::new(0.6, 0.01, 0.4), &mut rng);
        let kernel = Kernel::new(Matrix3::identity() * 0.05).unwrap();
        (engine, obs, kernel)
    }

    fn settings() -> SmcSettings {
        SmcSettings {
            n_particles: 200,
            n_generations: 4,
            tol_init: 150.0,
            scaling_factor: 2.0,
            ess_threshold: 100.0,
            theta_init: Theta::new(0.5, 0.02, 0.5),
        }
    }

    #[test]
    fn tolerance_schedule_is_non_increasing_and_bounded() {
        let (engine, obs, kernel) = setup();
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let settings = settings();

        let out = run_smc(&engine, &obs, &kernel, &settings, &mut rng).unwrap();

        assert_eq!(out.tolerances.len(), settings.n_generations);
        assert!(out.tolerances.iter().all(|&tol| tol <= settings.tol_init));
        assert!(out.tolerances.windows(2).all(|pair| pair[1] <= pair[0]));
    }

    #[test]
    fn output_shapes_and_weights() {
        let (engine, obs, kernel) = setup();
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let settings = settings();

        let out = run_smc(&engine, &obs, &kernel, &settings, &mut rng).unwrap();

        assert_eq!(out.particles.len(), settings.n_particles);
        assert_eq!(out.weights.len(), settings.n_particles);
        assert_eq!(out.ess.len(), settings.n_generations);
        assert_eq!(out.resampled.len(), settings.n_generations);
        assert!((out.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(out.weights.iter().all(|&w| w >= 0.0));
        for &ess in &out.ess {
            assert!(ess >= 1.0 - 1e-9 && ess <= settings.n_particles as f64 + 1e-9);
        }
        for theta in &out.particles {
            assert!(theta.to_array().iter().all(|&x| (0.0..=1.0).contains(&x)));
        }
    }

    #[test]
    fn full_threshold_always_resamples() {
        let (engine, obs, kernel) = setup();
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut settings = settings();
        settings.ess_threshold = settings.n_particles as f64;

        let out = run_smc(&engine, &obs, &kernel, &settings, &mut rng).unwrap();

        // Equal weights are the only way to reach ESS = M, which is measure zero.
        assert!(out.resampled.iter().all(|&r| r));
        let uniform = 1.0 / settings.n_particles as f64;
        assert!(out.weights.iter().all(|&w| (w - uniform).abs() < 1e-15));
    }

    #[test]
    fn same_seed_same_output() {
        let (engine, obs, kernel) = setup();
        let settings = settings();

        let a = run_smc(&engine, &obs, &kernel, &settings, &mut ChaCha12Rng::seed_from_u64(4))
            .unwrap();
        let b = run_smc(&engine, &obs, &kernel, &settings, &mut ChaCha12Rng::seed_from_u64(4))
            .unwrap();

        assert_eq!(a.particles, b.particles);
        assert_eq!(a.tolerances, b.tolerances);
    }

    #[test]
    fn incomparable_observation_reports_generation() {
        let (engine, _, kernel) = setup();
        let mut rng = ChaCha12Rng::seed_from_u64(5);

        let err = run_smc(&engine, &Trajectory::default(), &kernel, &settings(), &mut rng)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AbcError>(),
            Some(AbcError::NoFiniteDistances { generation: 1 })
        ));
    }

    #[test]
    fn weights_follow_gaussian_kernel() {
        let weights = normalized_weights(&[0.0, 1.0, f64::INFINITY], 1.0).unwrap();
        let a = 1.0;
        let b = (-0.5f64).exp();
        assert!((weights[0] - a / (a + b)).abs() < 1e-12);
        assert!((weights[1] - b / (a + b)).abs() < 1e-12);
        assert_eq!(weights[2], 0.0);

        assert!(normalized_weights(&[f64::INFINITY; 3], 1.0).is_none());
        assert_eq!(normalized_weights(&[0.0, 2.0], 0.0), Some(vec![1.0, 0.0]));
    }

    #[test]
    fn far_distances_do_not_underflow() {
        let weights = normalized_weights(&[1e4, 1e4 + 1.0], 1.0).unwrap();
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(weights[0] > weights[1]);
    }

    /// Summed variance of the logit-scale coordinates.
    fn logit_spread(particles: &[Theta]) -> f64 {
        let mut acc_arr: [Accumulator; 3] = std::array::from_fn(|_| Accumulator::new());
        for theta in particles {
            for (acc, val) in acc_arr.iter_mut().zip(theta_to_phi(theta).iter()) {
                acc.add(*val);
            }
        }
        acc_arr.iter().map(|acc| acc.report().std_dev.powi(2)).sum()
    }

    #[test]
    fn particles_walk_from_their_own_values() {
        let (engine, obs, kernel) = setup();
        let mut settings = settings();
        settings.ess_threshold = 0.0;

        settings.n_generations = 1;
        let one = run_smc(&engine, &obs, &kernel, &settings, &mut ChaCha12Rng::seed_from_u64(7))
            .unwrap();
        settings.n_generations = 2;
        let two = run_smc(&engine, &obs, &kernel, &settings, &mut ChaCha12Rng::seed_from_u64(7))
            .unwrap();

        assert!(one.resampled.iter().chain(&two.resampled).all(|&r| !r));

        // One step from theta_init has covariance 0.05 I on the logit scale,
        // two compounded steps have 0.1 I.
        let spread_one = logit_spread(&one.particles);
        let spread_two = logit_spread(&two.particles);
        assert!((spread_one - 0.15).abs() < 0.05, "spread after one {spread_one}");
        assert!(
            spread_two > 1.5 * spread_one,
            "spread after two {spread_two}, after one {spread_one}"
        );
    }

    #[test]
    fn weighted_population_moves_toward_generating_parameters() {
        let (engine, obs, _) = setup();
        let kernel = Kernel::new(Matrix3::identity() * 0.5).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let settings = SmcSettings {
            n_particles: 200,
            n_generations: 6,
            tol_init: 1000.0,
            scaling_factor: 1.0,
            ess_threshold: 100.0,
            theta_init: Theta::new(0.2, 0.01, 0.8),
        };

        let out = run_smc(&engine, &obs, &kernel, &settings, &mut rng).unwrap();
        let [mu, _, nu] = summarize_weighted(&out.particles, &out.weights).unwrap();

        let gap_init = (0.2f64 - 0.6).abs() + (0.8f64 - 0.4).abs();
        let gap_final = (mu.mean - 0.6).abs() + (nu.mean - 0.4).abs();
        assert!(
            gap_final < 0.75 * gap_init,
            "weighted mean mu {}, nu {}",
            mu.mean,
            nu.mean
        );
        assert!(out.tolerances.last() < out.tolerances.first());
    }

    #[test]
    fn invalid_settings_fail() {
        let (engine, obs, kernel) = setup();
        let mut rng = ChaCha12Rng::seed_from_u64(6);

        let mut bad = settings();
        bad.n_generations = 0;
        assert!(run_smc(&engine, &obs, &kernel, &bad, &mut rng).is_err());

        let mut bad = settings();
        bad.ess_threshold = 1e6;
        assert!(run_smc(&engine, &obs, &kernel, &bad, &mut rng).is_err());

        let mut bad = settings();
        bad.tol_init = 0.0;
        assert!(run_smc(&engine, &obs, &kernel, &bad, &mut rng).is_err());

        let mut bad = settings();
        bad.scaling_factor = f64::NAN;
        assert!(run_smc(&engine, &obs, &kernel, &bad, &mut rng).is_err());
    }
}
