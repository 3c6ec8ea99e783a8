//! High-level helpers that run the fitter over every profile of a run.

use crate::error::FitError;
use crate::fit::{FitResult, PeakShapeFitter, Rejection};
use log::{debug, info, log_enabled, Level};
use rayon::prelude::*;
use scdpeaks_core::{Hkl, Profile};
use std::fmt;

/// Outcome of fitting one profile.
#[derive(Debug, Clone, PartialEq)]
pub enum PeakFit {
    /// Fit passed every rejection test.
    Accepted(FitResult),
    /// Fit converged but failed a rejection test.
    Rejected(FitResult, Rejection),
    /// Solver failed.
    Failed(FitError),
}

impl PeakFit {
    /// Intensity, sigma and reflection flag to write, if the peak is
    /// written at all. Rejected peaks are written only when
    /// `write_rejected` is set, flagged with their rejection code.
    #[must_use]
    pub fn output(&self, write_rejected: bool) -> Option<(f64, f64, i32)> {
        match self {
            Self::Accepted(fit) => Some((fit.intensity, fit.sigma, fit.reflection_flag)),
            Self::Rejected(fit, rejection) if write_rejected => {
                Some((fit.intensity, fit.sigma, rejection.code()))
            }
            _ => None,
        }
    }

    /// The fit, unless the solver failed.
    #[must_use]
    pub fn result(&self) -> Option<&FitResult> {
        match self {
            Self::Accepted(fit) | Self::Rejected(fit, _) => Some(fit),
            Self::Failed(_) => None,
        }
    }
}

/// Per-run tallies of fitting outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationSummary {
    /// Profiles processed.
    pub processed: usize,
    /// Fits accepted.
    pub accepted: usize,
    /// Rejected for intensity ≤ 0.
    pub rejected_intensity: usize,
    /// Rejected for an off-center peak.
    pub rejected_center: usize,
    /// Rejected for a degenerate width.
    pub rejected_width: usize,
    /// Solver failures.
    pub failed: usize,
}

impl IntegrationSummary {
    /// All rejections.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.rejected_intensity + self.rejected_center + self.rejected_width
    }

    fn record(&mut self, fit: &PeakFit) {
        self.processed += 1;
        match fit {
            PeakFit::Accepted(_) => self.accepted += 1,
            PeakFit::Rejected(_, Rejection::IntensityNotPositive) => self.rejected_intensity += 1,
            PeakFit::Rejected(_, Rejection::CenterOffset) => self.rejected_center += 1,
            PeakFit::Rejected(_, Rejection::DegenerateWidth) => self.rejected_width += 1,
            PeakFit::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for IntegrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} peaks processed: {} accepted, {} rejected (intensity {}, center {}, width {}), {} failed",
            self.processed,
            self.accepted,
            self.rejected(),
            self.rejected_intensity,
            self.rejected_center,
            self.rejected_width,
            self.failed
        )
    }
}

/// Fits for every profile of a run, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    /// One outcome per input profile.
    pub fits: Vec<PeakFit>,
    /// Tallies over `fits`.
    pub summary: IntegrationSummary,
}

/// Fit and judge one profile. Failures are contained to the peak.
#[must_use]
pub fn fit_profile(fitter: &PeakShapeFitter, hkl: Hkl, profile: &Profile) -> PeakFit {
    match fitter.fit(profile) {
        Ok(fit) => {
            if log_enabled!(Level::Debug) {
                debug!("Fit {hkl}: {}", fitter.describe(&fit));
            }
            match fitter.assess(&fit) {
                None => PeakFit::Accepted(fit),
                Some(rejection) => {
                    debug!(
                        "Rejected {hkl}: {rejection} (I = {:.2}, mu = {:.2}, sigma = {:.3})",
                        fit.intensity, fit.center, fit.width
                    );
                    PeakFit::Rejected(fit, rejection)
                }
            }
        }
        Err(err) => {
            debug!("Fit failed for {hkl}: {err}");
            PeakFit::Failed(err)
        }
    }
}

/// Fit every profile. `hkls` and `profiles` are paired by position.
///
/// Profiles are independent, so with `parallel` set they are fitted on the
/// rayon pool; the output order is the input order either way.
#[must_use]
pub fn fit_profiles(
    fitter: &PeakShapeFitter,
    hkls: &[Hkl],
    profiles: &[Profile],
    parallel: bool,
) -> Integration {
    let fits: Vec<PeakFit> = if parallel {
        hkls.par_iter()
            .zip(profiles.par_iter())
            .map(|(&hkl, profile)| fit_profile(fitter, hkl, profile))
            .collect()
    } else {
        hkls.iter()
            .zip(profiles)
            .map(|(&hkl, profile)| fit_profile(fitter, hkl, profile))
            .collect()
    };

    let mut summary = IntegrationSummary::default();
    for fit in &fits {
        summary.record(fit);
    }
    info!("{summary}");
    Integration { fits, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scdpeaks_core::config::FitConfig;

    fn profiles() -> (Vec<Hkl>, Vec<Profile>) {
        let mut spike = vec![0; 100];
        spike[50] = 1000;
        let mut hole = vec![10; 100];
        for c in &mut hole[45..56] {
            *c = 0;
        }
        // Too short for a five-parameter model.
        let short = vec![1, 2, 1];
        (
            vec![Hkl::new(1, 0, 0), Hkl::new(0, 1, 0), Hkl::new(0, 0, 1)],
            vec![
                Profile::from_counts(spike),
                Profile::from_counts(hole),
                Profile::from_counts(short),
            ],
        )
    }

    #[test]
    fn test_failures_are_contained() {
        let fitter = PeakShapeFitter::new(&FitConfig::default(), 100);
        let (hkls, profiles) = profiles();
        let integration = fit_profiles(&fitter, &hkls, &profiles, false);

        assert_eq!(integration.fits.len(), 3);
        assert!(matches!(integration.fits[0], PeakFit::Accepted(_)));
        assert!(matches!(
            integration.fits[1],
            PeakFit::Rejected(_, Rejection::IntensityNotPositive)
        ));
        assert!(matches!(
            integration.fits[2],
            PeakFit::Failed(FitError::TooFewPoints { .. })
        ));
        assert_eq!(
            integration.summary,
            IntegrationSummary {
                processed: 3,
                accepted: 1,
                rejected_intensity: 1,
                rejected_center: 0,
                rejected_width: 0,
                failed: 1,
            }
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let fitter = PeakShapeFitter::new(&FitConfig::default(), 100);
        let (hkls, profiles) = profiles();
        assert_eq!(
            fit_profiles(&fitter, &hkls, &profiles, true),
            fit_profiles(&fitter, &hkls, &profiles, false)
        );
    }

    #[test]
    fn test_output_policy() {
        let fitter = PeakShapeFitter::new(&FitConfig::default(), 100);
        let (hkls, profiles) = profiles();
        let integration = fit_profiles(&fitter, &hkls, &profiles, false);

        let (intensity, _, flag) = integration.fits[0].output(false).unwrap();
        assert!((intensity - 1000.0).abs() < 1.0);
        assert_eq!(flag, 11);

        assert_eq!(integration.fits[1].output(false), None);
        let (intensity, _, flag) = integration.fits[1].output(true).unwrap();
        assert!(intensity <= 0.0);
        assert_eq!(flag, 91);

        assert_eq!(integration.fits[2].output(true), None);
        assert!(integration.fits[2].result().is_none());
    }

    #[test]
    fn test_summary_display() {
        let summary = IntegrationSummary {
            processed: 10,
            accepted: 7,
            rejected_intensity: 1,
            rejected_center: 1,
            rejected_width: 0,
            failed: 1,
        };
        assert_eq!(
            summary.to_string(),
            "10 peaks processed: 7 accepted, 2 rejected (intensity 1, center 1, width 0), 1 failed"
        );
    }
}
