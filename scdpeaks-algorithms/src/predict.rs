//! Peak prediction.
//!
//! Enumerates every Miller-index triple inside the unit cell's search box,
//! keeps those allowed by the centering and above the d-spacing limit, and
//! traces each surviving reflection to the first detector plane that
//! records it. Beam along +x, so a reflecting lattice point must have a
//! negative Qx; the elastic condition then fixes the wavelength at
//! `λ = -2·Qx / |Q|²`.

use log::debug;
use nalgebra::Vector3;
use scdpeaks_core::config::{InstrumentConfig, PredictionConfig, ReductionConfig};
use scdpeaks_core::{CandidatePeak, Hkl, HklBounds, OrientationMatrix, UnitCell};

/// `L (m) · λ (Å) / NEUTRON_TOF_FACTOR` gives the flight time in μs.
pub const NEUTRON_TOF_FACTOR: f64 = 3.956_034e-3;

/// Relative slack on the d-spacing cut so that reflections sitting exactly
/// on `d_min` survive rounding in `1 / |Q|`.
const D_SPACING_TOLERANCE: f64 = 1e-9;

/// A reflection allowed by the lattice, before any instrument geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    /// Miller indices.
    pub hkl: Hkl,
    /// Scattering vector (1/d units).
    pub q: Vector3<f64>,
    /// d-spacing (Å).
    pub d_spacing: f64,
}

/// Counts of reflections dropped at each prediction stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionStatistics {
    /// Reflections passing the lattice stage.
    pub reflections: usize,
    /// Dropped because Qx ≥ 0.
    pub not_reflecting: usize,
    /// Dropped by the wavelength window.
    pub outside_wavelength: usize,
    /// Not recorded by any detector.
    pub missed_detectors: usize,
    /// Candidates produced.
    pub predicted: usize,
}

/// Predicts which reflections reach the detectors, and where.
pub struct PeakPredictor<'a> {
    orientation: &'a OrientationMatrix,
    bounds: HklBounds,
    prediction: &'a PredictionConfig,
    instrument: &'a InstrumentConfig,
}

impl<'a> PeakPredictor<'a> {
    /// Create a predictor for one crystal orientation.
    #[must_use]
    pub fn new(
        orientation: &'a OrientationMatrix,
        cell: &UnitCell,
        config: &'a ReductionConfig,
    ) -> Self {
        Self {
            orientation,
            bounds: cell.hkl_bounds(config.prediction.d_min),
            prediction: &config.prediction,
            instrument: &config.instrument,
        }
    }

    /// Miller-index search box.
    #[must_use]
    pub fn bounds(&self) -> HklBounds {
        self.bounds
    }

    /// Lattice stage only: every non-origin triple in the search box that
    /// the centering allows with `d ≥ d_min`, h outermost, l innermost.
    #[must_use]
    pub fn enumerate_reflections(&self) -> Vec<Reflection> {
        let HklBounds { hmax, kmax, lmax } = self.bounds;
        let centering = self.prediction.centering;
        let d_cut = self.prediction.d_min * (1.0 - D_SPACING_TOLERANCE);
        let mut reflections = Vec::new();

        for h in -hmax..=hmax {
            for k in -kmax..=kmax {
                for l in -lmax..=lmax {
                    let hkl = Hkl::new(h, k, l);
                    if hkl.is_origin() || !centering.allows(h, k, l) {
                        continue;
                    }
                    let q = self.orientation.q_vector(h, k, l);
                    let d_spacing = 1.0 / q.norm();
                    if d_spacing < d_cut {
                        continue;
                    }
                    reflections.push(Reflection { hkl, q, d_spacing });
                }
            }
        }
        reflections
    }

    /// Predict the candidate list, numbered from 1 in enumeration order.
    #[must_use]
    pub fn predict(&self) -> Vec<CandidatePeak> {
        self.predict_with_statistics().0
    }

    /// Predict the candidate list and report where reflections were lost.
    #[must_use]
    pub fn predict_with_statistics(&self) -> (Vec<CandidatePeak>, PredictionStatistics) {
        let reflections = self.enumerate_reflections();
        let mut stats = PredictionStatistics {
            reflections: reflections.len(),
            ..PredictionStatistics::default()
        };
        let mut peaks = Vec::new();

        for reflection in &reflections {
            match self.trace(reflection) {
                Trace::Hit(mut peak) => {
                    peak.seqn = u32::try_from(peaks.len() + 1).unwrap_or(u32::MAX);
                    peaks.push(*peak);
                }
                Trace::NotReflecting => stats.not_reflecting += 1,
                Trace::OutsideWavelength => stats.outside_wavelength += 1,
                Trace::Missed => stats.missed_detectors += 1,
            }
        }
        stats.predicted = peaks.len();
        debug!(
            "Predicted {} peaks from {} reflections (box ±{}/±{}/±{}): {} with Qx >= 0, {} outside wavelength window, {} missed detectors",
            stats.predicted,
            stats.reflections,
            self.bounds.hmax,
            self.bounds.kmax,
            self.bounds.lmax,
            stats.not_reflecting,
            stats.outside_wavelength,
            stats.missed_detectors
        );
        (peaks, stats)
    }

    /// Trace one reflection to a detector. The returned peak has `seqn` 0.
    #[must_use]
    pub fn predict_reflection(&self, reflection: &Reflection) -> Option<CandidatePeak> {
        match self.trace(reflection) {
            Trace::Hit(peak) => Some(*peak),
            _ => None,
        }
    }

    fn trace(&self, reflection: &Reflection) -> Trace {
        let q = reflection.q;
        if q.x >= 0.0 {
            return Trace::NotReflecting;
        }
        let q_sq = q.norm_squared();
        let wavelength = -2.0 * q.x / q_sq;
        if wavelength < self.prediction.wavelength_min
            || wavelength > self.prediction.wavelength_max
        {
            return Trace::OutsideWavelength;
        }

        let cos_two_theta = (1.0 + wavelength * q.x).clamp(-1.0, 1.0);
        let two_theta = cos_two_theta.acos();
        let direction = (q * wavelength + Vector3::x()).normalize();
        let azimuth = direction.z.atan2(direction.y);

        let cone = self.prediction.cone_half_angle.to_radians();
        let hit = self.instrument.detectors.iter().find_map(|detector| {
            if !detector.within_cone(&direction, cone) {
                return None;
            }
            detector
                .project(&direction, self.prediction.edge_pixels)
                .map(|hit| (detector.id, hit))
        });
        let Some((detector_id, hit)) = hit else {
            return Trace::Missed;
        };

        let tof = (self.instrument.l1 + hit.l2) * wavelength / NEUTRON_TOF_FACTOR
            + self.instrument.t0_shift;

        Trace::Hit(Box::new(CandidatePeak {
            seqn: 0,
            hkl: reflection.hkl,
            q,
            d_spacing: reflection.d_spacing,
            wavelength,
            two_theta,
            azimuth,
            detector_id,
            col: hit.col,
            row: hit.row,
            l2: hit.l2,
            tof,
            intensity: 0.0,
            sigma: 0.0,
            reflection_flag: 0,
        }))
    }
}

enum Trace {
    Hit(Box<CandidatePeak>),
    NotReflecting,
    OutsideWavelength,
    Missed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use scdpeaks_core::{Centering, DetectorPlane};

    fn cubic(edge: f64) -> (OrientationMatrix, UnitCell) {
        let s = 1.0 / edge;
        let ub = OrientationMatrix::from_rows([[s, 0.0, 0.0], [0.0, s, 0.0], [0.0, 0.0, s]])
            .unwrap();
        (ub, UnitCell::new(edge, edge, edge).unwrap())
    }

    fn side_detector() -> DetectorPlane {
        DetectorPlane {
            id: 17,
            rows: 256,
            cols: 256,
            width: 0.2,
            height: 0.2,
            depth: 0.0,
            center: [0.0, 0.4, 0.0],
            base: [1.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_cubic_enumeration() {
        let (ub, cell) = cubic(5.0);
        let config = ReductionConfig::default().with_d_min(1.0);
        let predictor = PeakPredictor::new(&ub, &cell, &config);
        assert_eq!(predictor.bounds(), HklBounds::new(5, 5, 5));

        let reflections = predictor.enumerate_reflections();
        assert_eq!(reflections.len(), 514);
        assert!(reflections
            .iter()
            .all(|r| r.hkl.h * r.hkl.h + r.hkl.k * r.hkl.k + r.hkl.l * r.hkl.l <= 25));
        // Exactly at d_min.
        assert!(reflections.iter().any(|r| r.hkl == Hkl::new(3, 4, 0)));
        assert!(reflections.iter().any(|r| r.hkl == Hkl::new(-5, 0, 0)));
        assert_eq!(reflections[0].hkl, Hkl::new(-5, 0, 0));
    }

    #[test]
    fn test_centered_enumeration() {
        let (ub, cell) = cubic(5.0);
        let body = ReductionConfig::default()
            .with_d_min(1.0)
            .with_centering(Centering::I);
        assert_eq!(
            PeakPredictor::new(&ub, &cell, &body)
                .enumerate_reflections()
                .len(),
            248
        );
        let face = ReductionConfig::default()
            .with_d_min(1.0)
            .with_centering(Centering::F);
        let reflections = PeakPredictor::new(&ub, &cell, &face).enumerate_reflections();
        assert_eq!(reflections.len(), 136);
        assert!(reflections
            .iter()
            .all(|r| Centering::F.allows(r.hkl.h, r.hkl.k, r.hkl.l)));
    }

    #[test]
    fn test_predict_on_side_detector() {
        let (ub, cell) = cubic(2.0);
        let config = ReductionConfig::default()
            .with_d_min(0.5)
            .with_detectors(vec![side_detector()]);
        let predictor = PeakPredictor::new(&ub, &cell, &config);
        let peaks = predictor.predict();
        assert!(!peaks.is_empty());

        // Q = (-0.5, 0.5, 0): λ = 2 Å, scattered straight along +y.
        let peak = peaks
            .iter()
            .find(|p| p.hkl == Hkl::new(-1, 1, 0))
            .unwrap();
        assert_eq!(peak.detector_id, 17);
        assert_relative_eq!(peak.wavelength, 2.0, epsilon = 1e-12);
        assert_relative_eq!(peak.two_theta, std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(peak.azimuth, 0.0, epsilon = 1e-9);
        assert_relative_eq!(peak.d_spacing, 2f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(peak.col, 128.5, epsilon = 1e-6);
        assert_relative_eq!(peak.row, 128.5, epsilon = 1e-6);
        assert_relative_eq!(peak.l2, 0.4, epsilon = 1e-9);
        assert_relative_eq!(peak.tof, 18.4 * 2.0 / NEUTRON_TOF_FACTOR, epsilon = 1e-6);

        for (i, peak) in peaks.iter().enumerate() {
            assert_eq!(peak.seqn as usize, i + 1);
            assert!(peak.q.x < 0.0);
        }
    }

    #[test]
    fn test_predict_single_reflection() {
        let (ub, cell) = cubic(2.0);
        let config = ReductionConfig::default()
            .with_d_min(0.5)
            .with_detectors(vec![side_detector()]);
        let predictor = PeakPredictor::new(&ub, &cell, &config);
        let reflections = predictor.enumerate_reflections();
        let find = |hkl: Hkl| reflections.iter().find(|r| r.hkl == hkl).unwrap();

        let traced = predictor
            .predict_reflection(find(Hkl::new(-1, 1, 0)))
            .unwrap();
        assert_eq!(traced.seqn, 0);
        let listed = predictor
            .predict()
            .into_iter()
            .find(|p| p.hkl == Hkl::new(-1, 1, 0))
            .unwrap();
        assert_eq!(CandidatePeak { seqn: 0, ..listed }, traced);

        // Qx > 0 cannot satisfy Bragg's law for a beam along +x.
        assert_eq!(predictor.predict_reflection(find(Hkl::new(1, 1, 0))), None);
        // Scattered along -y, away from the only detector.
        assert_eq!(predictor.predict_reflection(find(Hkl::new(-1, -1, 0))), None);
    }

    #[test]
    fn test_predict_is_deterministic() {
        let (ub, cell) = cubic(2.0);
        let config = ReductionConfig::default()
            .with_d_min(0.5)
            .with_detectors(vec![side_detector()]);
        let first = PeakPredictor::new(&ub, &cell, &config).predict();
        let second = PeakPredictor::new(&ub, &cell, &config).predict();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_detectors_predicts_nothing() {
        let (ub, cell) = cubic(5.0);
        let config = ReductionConfig::default().with_d_min(1.0);
        let (peaks, stats) = PeakPredictor::new(&ub, &cell, &config).predict_with_statistics();
        assert!(peaks.is_empty());
        assert_eq!(stats.reflections, 514);
        assert_eq!(
            stats.not_reflecting + stats.outside_wavelength + stats.missed_detectors,
            514
        );
    }

    #[test]
    fn test_wavelength_window() {
        let (ub, cell) = cubic(2.0);
        let config = ReductionConfig::default()
            .with_d_min(0.5)
            .with_wavelength_range(2.5, 3.5)
            .with_detectors(vec![side_detector()]);
        let peaks = PeakPredictor::new(&ub, &cell, &config).predict();
        assert!(peaks.iter().all(|p| p.wavelength >= 2.5));
        assert!(!peaks.iter().any(|p| p.hkl == Hkl::new(-1, 1, 0)));
    }
}
