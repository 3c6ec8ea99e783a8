//! Predicted Bragg peaks.

use nalgebra::Vector3;

/// Miller index triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hkl {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl Hkl {
    /// Creates a new triple.
    #[inline]
    #[must_use]
    pub fn new(h: i32, k: i32, l: i32) -> Self {
        Self { h, k, l }
    }

    /// Returns true for (0, 0, 0).
    #[inline]
    #[must_use]
    pub fn is_origin(&self) -> bool {
        self.h == 0 && self.k == 0 && self.l == 0
    }
}

impl std::fmt::Display for Hkl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.h, self.k, self.l)
    }
}

/// A reflection predicted to fall on a detector.
///
/// Geometry fields are fixed at prediction time; `intensity`, `sigma` and
/// `reflection_flag` are filled in by profile fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePeak {
    /// 1-based position in the candidate list.
    pub seqn: u32,
    pub hkl: Hkl,
    /// Scattering vector in 1/d units (no 2π).
    pub q: Vector3<f64>,
    /// d-spacing (Å).
    pub d_spacing: f64,
    /// Wavelength (Å).
    pub wavelength: f64,
    /// Scattering angle 2θ (radians).
    pub two_theta: f64,
    /// Azimuthal angle of the scattered beam (radians).
    pub azimuth: f64,
    /// Detector id the reflection falls on.
    pub detector_id: u32,
    /// Fractional pixel column, 1-based.
    pub col: f64,
    /// Fractional pixel row, 1-based.
    pub row: f64,
    /// Sample-to-pixel distance (m).
    pub l2: f64,
    /// Time of flight (μs).
    pub tof: f64,
    pub intensity: f64,
    pub sigma: f64,
    pub reflection_flag: i32,
}

impl CandidatePeak {
    /// Magnitude of the scattering vector (1/d units).
    #[inline]
    #[must_use]
    pub fn q_norm(&self) -> f64 {
        self.q.norm()
    }
}
