use thiserror::Error;

/// Sampler outcomes that callers may want to tell apart from plain failures.
///
/// These travel inside [`anyhow::Error`] and can be recovered with
/// `downcast_ref::<AbcError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbcError {
    #[error("no proposal out of {n_draws} was within tolerance {tolerance}")]
    NoAcceptances { n_draws: usize, tolerance: f64 },

    #[error("no particle in generation {generation} produced a finite distance")]
    NoFiniteDistances { generation: usize },

    #[error("proposal covariance is not positive definite")]
    NotPositiveDefinite,
}
