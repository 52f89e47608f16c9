//! Logit reparameterization and the random-walk proposal kernel.

use crate::error::AbcError;
use crate::model::Theta;
use anyhow::{Result, bail};
use nalgebra::{Matrix3, Vector3};
use rand::prelude::*;
use rand_distr::StandardNormal;

/// Distance kept between a rate and the boundary of `(0, 1)` before transforming.
const THETA_EPS: f64 = 1e-12;

pub fn logit(x: f64) -> f64 {
    let x = x.clamp(THETA_EPS, 1.0 - THETA_EPS);
    (x / (1.0 - x)).ln()
}

pub fn sigmoid(phi: f64) -> f64 {
    if phi >= 0.0 {
        1.0 / (1.0 + (-phi).exp())
    } else {
        let e = phi.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

pub fn theta_to_phi(theta: &Theta) -> Vector3<f64> {
    Vector3::from(theta.to_array().map(logit))
}

pub fn phi_to_theta(phi: &Vector3<f64>) -> Theta {
    Theta::new(sigmoid(phi[0]), sigmoid(phi[1]), sigmoid(phi[2]))
}

/// Log density of the uniform prior on `(0, 1)^3` pushed through the logit.
///
/// Each component contributes the standard logistic density
/// `-phi - 2 ln(1 + e^-phi)`.
pub fn log_prior_phi(phi: &Vector3<f64>) -> f64 {
    phi.iter().map(|&x| -x - 2.0 * softplus(-x)).sum()
}

/// Gaussian random-walk kernel on the logit scale.
#[derive(Debug, Clone)]
pub struct Kernel {
    chol: Matrix3<f64>,
}

impl Kernel {
    /// Build a kernel from a proposal covariance.
    ///
    /// # Errors
    /// Returns [`AbcError::NotPositiveDefinite`] if the covariance is not
    /// symmetric positive definite.
    pub fn new(cov: Matrix3<f64>) -> Result<Self> {
        if cov.iter().any(|x| !x.is_finite()) {
            bail!("covariance must be finite, but is {cov}");
        }
        if (cov - cov.transpose()).abs().max() > 1e-9 * cov.abs().max().max(1.0) {
            bail!("covariance must be symmetric, but is {cov}");
        }
        let chol = cov.cholesky().ok_or(AbcError::NotPositiveDefinite)?;
        Ok(Self { chol: chol.l() })
    }

    /// Draw `phi + L z` with `z` standard normal.
    pub fn perturb<R: Rng + ?Sized>(&self, phi: &Vector3<f64>, rng: &mut R) -> Vector3<f64> {
        let z = Vector3::from_fn(|_, _| rng.sample::<f64, _>(StandardNormal));
        phi + self.chol * z
    }

    /// Propose a new parameter vector around `theta`.
    ///
    /// Returns the logit-scale current point and proposal together with
    /// the mapped-back proposal.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        theta: &Theta,
        rng: &mut R,
    ) -> (Vector3<f64>, Vector3<f64>, Theta) {
        let phi_cur = theta_to_phi(theta);
        let phi_prop = self.perturb(&phi_cur, rng);
        (phi_cur, phi_prop, phi_to_theta(&phi_prop))
    }
}
