//! Error types for scdpeaks-algorithms.

use thiserror::Error;

/// Result type alias for peak-shape fitting.
pub type Result<T> = std::result::Result<T, FitError>;

/// Per-peak fitting failures.
///
/// A failed fit affects only its own peak; the integration driver logs and
/// counts it, then moves on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// The profile has fewer channels than the model has parameters.
    #[error("profile has {points} channels, model needs at least {params}")]
    TooFewPoints {
        /// Channels in the profile.
        points: usize,
        /// Parameters of the model.
        params: usize,
    },

    /// The model could not be evaluated at the starting parameters.
    #[error("model is not finite at the initial parameters")]
    NonFiniteStart,

    /// The iteration limit was reached.
    #[error("no convergence after {iterations} iterations")]
    NotConverged {
        /// Iterations spent.
        iterations: usize,
    },
}
