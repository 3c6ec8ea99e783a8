//! Peak-shape fitting.
//!
//! [`PeakShapeFitter`] fits one of the [`models`] to a profile with the
//! [`lm`] solver, derives the integrated intensity and its uncertainty, and
//! applies the configured rejection policy.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

pub mod lm;
pub mod models;
pub mod quadrature;

use crate::error::Result;
use lm::LevenbergMarquardt;
use models::{model_for, PeakShape};
use scdpeaks_core::config::{FitConfig, ProfileFunction};
use scdpeaks_core::Profile;
use std::fmt;

/// Uncertainty assigned to empty channels in weighted fits.
const EMPTY_CHANNEL_SIGMA: f64 = 100.0;

/// Widths at or below this are degenerate.
const MIN_GAUSSIAN_SIGMA: f64 = 0.01;

/// Fitted peak.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Model used.
    pub function: ProfileFunction,
    /// Fitted parameters in the model's layout.
    pub params: Vec<f64>,
    /// Integrated intensity of the peak term.
    pub intensity: f64,
    /// Uncertainty of `intensity`.
    pub sigma: f64,
    /// Fitted peak position (channels).
    pub center: f64,
    /// Fitted Gaussian width (channels).
    pub width: f64,
    /// Solver iterations.
    pub iterations: usize,
    /// Reflection flag for an accepted fit.
    pub reflection_flag: i32,
}

/// Reason a fitted peak is left out of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Intensity ≤ 0.
    IntensityNotPositive,
    /// Fitted center too far from the designed center.
    CenterOffset,
    /// Gaussian width ≤ 0.01 channels.
    DegenerateWidth,
}

impl Rejection {
    /// Reflection flag written for rejected peaks when they are kept.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::IntensityNotPositive => 91,
            Self::CenterOffset => 92,
            Self::DegenerateWidth => 93,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntensityNotPositive => write!(f, "intensity <= 0"),
            Self::CenterOffset => write!(f, "center outside tolerance"),
            Self::DegenerateWidth => write!(f, "sigma <= {MIN_GAUSSIAN_SIGMA}"),
        }
    }
}

/// Fits profiles and judges the results.
pub struct PeakShapeFitter {
    model: Box<dyn PeakShape>,
    config: FitConfig,
    num_steps: usize,
    solver: LevenbergMarquardt,
}

impl PeakShapeFitter {
    /// Create a fitter for profiles of `num_steps` channels.
    #[must_use]
    pub fn new(config: &FitConfig, num_steps: usize) -> Self {
        Self {
            model: model_for(config.profile_function),
            config: config.clone(),
            num_steps,
            solver: LevenbergMarquardt::with_max_iterations(config.max_iterations),
        }
    }

    /// The peak-shape model.
    #[must_use]
    pub fn model(&self) -> &dyn PeakShape {
        self.model.as_ref()
    }

    /// Fitting configuration.
    #[must_use]
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Channels per profile.
    #[must_use]
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Designed center channel.
    #[must_use]
    pub fn center_channel(&self) -> f64 {
        (self.num_steps / 2) as f64
    }

    /// Fit `profile`.
    ///
    /// # Errors
    /// Returns a [`crate::FitError`] if the solver fails; the caller decides
    /// whether to skip the peak.
    pub fn fit(&self, profile: &Profile) -> Result<FitResult> {
        let ys: Vec<f64> = profile.counts().iter().map(|&c| f64::from(c)).collect();
        let xs: Vec<f64> = (0..ys.len()).map(|x| x as f64).collect();
        let weights: Vec<f64> = if self.config.weights {
            ys.iter()
                .map(|&y| if y > 0.0 { 1.0 / y.sqrt() } else { 1.0 / EMPTY_CHANNEL_SIGMA })
                .collect()
        } else {
            vec![1.0; ys.len()]
        };

        let search = self.config.center_tolerance.floor().max(0.0) as usize;
        let start = self.model.initial_guess(&ys, search);
        let model = self.model.as_ref();
        let solution = self.solver.minimize_bounded(
            |x, p| model.evaluate(x, p),
            &xs,
            &ys,
            &weights,
            &start,
            &model.lower_bounds(),
        )?;

        let mut params = solution.params;
        model.normalize(&mut params);
        let intensity = model.intensity(&params, ys.len());
        let background_under_peak: f64 = xs
            .iter()
            .filter(|&&x| model.peak(x, &params) > 0.0)
            .map(|&x| model.background(x, &params))
            .sum();

        Ok(FitResult {
            function: model.function(),
            intensity,
            sigma: (intensity.abs() + background_under_peak).max(0.0).sqrt(),
            center: model.center(&params),
            width: model.width(&params),
            iterations: solution.iterations,
            reflection_flag: self.config.reflection_flag(),
            params,
        })
    }

    /// One-line parameter record, e.g. `a=1000 sigma=0.05 mu=50 ... (7 iterations)`.
    #[must_use]
    pub fn describe(&self, result: &FitResult) -> String {
        let mut line = self
            .model
            .parameter_names()
            .iter()
            .zip(&result.params)
            .map(|(name, value)| format!("{name}={value:.6}"))
            .collect::<Vec<_>>()
            .join(" ");
        line.push_str(&format!(" ({} iterations)", result.iterations));
        line
    }

    /// Apply the rejection policy; `None` means the fit is accepted.
    #[must_use]
    pub fn assess(&self, result: &FitResult) -> Option<Rejection> {
        if self.config.reject_intensity_zero && result.intensity <= 0.0 {
            return Some(Rejection::IntensityNotPositive);
        }
        if (result.center - self.center_channel()).abs() >= self.config.center_tolerance {
            return Some(Rejection::CenterOffset);
        }
        if self.config.reject_gaussian_sigma_zero && result.width <= MIN_GAUSSIAN_SIGMA {
            return Some(Rejection::DegenerateWidth);
        }
        None
    }
}
