use crate::error::AbcError;
use crate::model::Theta;
use crate::transform::theta_to_phi;
use anyhow::{Result, bail};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Running weighted mean and variance (West's weighted Welford).
///
/// `add` is `add_weighted` with unit weight, so unweighted samples get the
/// usual `n - 1` estimator. Weights are treated as reliability weights and
/// only their ratios matter.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    w_sum: f64,
    w_2_sum: f64,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, val: f64) {
        self.add_weighted(val, 1.0);
    }

    /// Values with non-positive weight are ignored.
    pub fn add_weighted(&mut self, val: f64, weight: f64) {
        if weight <= 0.0 {
            return;
        }
        self.w_sum += weight;
        self.w_2_sum += weight * weight;

        let diff_a = val - self.mean;
        self.mean += (weight / self.w_sum) * diff_a;

        let diff_b = val - self.mean;
        self.diff_2_sum += weight * diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        let denom = self.w_sum - self.w_2_sum / self.w_sum;
        AccumulatorReport {
            mean: if self.w_sum > 0.0 { self.mean } else { f64::NAN },
            std_dev: if self.w_sum > 0.0 && denom > 0.0 {
                (self.diff_2_sum / denom).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// Per-parameter mean and standard deviation of a sample.
pub fn summarize(samples: &[Theta]) -> [AccumulatorReport; 3] {
    let mut acc_arr: [Accumulator; 3] = std::array::from_fn(|_| Accumulator::new());
    for theta in samples {
        for (acc, val) in acc_arr.iter_mut().zip(theta.to_array()) {
            acc.add(val);
        }
    }
    acc_arr.map(|acc| acc.report())
}

/// Per-parameter weighted mean and standard deviation of a population.
pub fn summarize_weighted(samples: &[Theta], weights: &[f64]) -> Result<[AccumulatorReport; 3]> {
    if samples.len() != weights.len() {
        bail!("got {} weights for {} samples", weights.len(), samples.len());
    }
    let mut acc_arr: [Accumulator; 3] = std::array::from_fn(|_| Accumulator::new());
    for (theta, &weight) in samples.iter().zip(weights) {
        for (acc, val) in acc_arr.iter_mut().zip(theta.to_array()) {
            acc.add_weighted(val, weight);
        }
    }
    Ok(acc_arr.map(|acc| acc.report()))
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// Non-finite values sort above every finite one. Returns `NaN` for an
/// empty slice.
pub fn quantile(vals: &[f64], prob: f64) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    let mut sorted = vals.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = prob.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    if lo == hi || frac == 0.0 {
        return sorted[lo];
    }
    if !sorted[hi].is_finite() {
        return sorted[hi];
    }
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

pub fn median(vals: &[f64]) -> f64 {
    quantile(vals, 0.5)
}

/// Effective sample size `1 / sum(w_i^2)` of normalized weights.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 }
}

/// Sample covariance of the logit-transformed parameter vectors.
///
/// # Errors
/// Returns an error if fewer than four samples are given or the estimate
/// is not positive definite.
pub fn logit_covariance(samples: &[Theta]) -> Result<Matrix3<f64>> {
    let n = samples.len();
    if n < 4 {
        bail!("at least 4 samples are needed to estimate a 3x3 covariance, but got {n}");
    }

    let phis: Vec<Vector3<f64>> = samples.iter().map(theta_to_phi).collect();
    let mean = phis.iter().sum::<Vector3<f64>>() / n as f64;
    let cov = phis
        .iter()
        .map(|phi| (phi - mean) * (phi - mean).transpose())
        .sum::<Matrix3<f64>>()
        / (n - 1) as f64;

    if cov.cholesky().is_none() {
        bail!(AbcError::NotPositiveDefinite);
    }

    Ok(cov)
}
