//! scdpeaks-algorithms: Peak prediction, event projection and profile fitting.
//!
//! This crate provides the numerical stages of a reduction:
//! - **Prediction** - enumerate reflections and trace them onto detectors
//! - **Index** - dense (h, k, l) lookup of predicted peaks
//! - **Projection** - bin Q-space events into per-peak profiles
//! - **Fitting** - peak-shape models and a Levenberg–Marquardt solver
//!
#![warn(missing_docs)]

mod error;
pub mod fit;
mod index;
mod predict;
mod processing;
mod projector;

pub use error::{FitError, Result};
pub use fit::models::{model_for, PeakShape};
pub use fit::{FitResult, PeakShapeFitter, Rejection};
pub use index::HklIndex;
pub use predict::{PeakPredictor, PredictionStatistics, Reflection, NEUTRON_TOF_FACTOR};
pub use processing::{fit_profile, fit_profiles, Integration, IntegrationSummary, PeakFit};
pub use projector::{
    within_cylinder, EventProjector, Projection, ProjectionGeometry, ProjectionStatistics,
};
