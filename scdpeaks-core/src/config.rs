//! Reduction configuration.
//!
//! A [`ReductionConfig`] is loaded once from JSON, validated, and then passed
//! by reference to every stage. Every section and field has a default, so a
//! config file only needs to name what differs:
//!
//! ```json
//! {
//!   "run": { "run_number": 8001, "events_file": "run8001.bin" },
//!   "prediction": { "centering": "F", "d_min": 0.6 },
//!   "fit": { "profile_function": "gaussian", "weights": true }
//! }
//! ```

use crate::detector::DetectorPlane;
use crate::lattice::Centering;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::TAU;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Smallest accepted `d_min` (Å). Below it the search box grows with the
/// cube of `edge / d_min` and no longer fits a dense index.
pub const MIN_D_SPACING: f64 = 0.1;

/// Byte order of the binary event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Peak-shape model used by the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFunction {
    /// Gaussian on a linear background.
    #[default]
    Gaussian,
    /// Single back-to-back exponential convolved with a Gaussian.
    SingleExponential,
    /// Double back-to-back exponential convolved with a Gaussian.
    DoubleExponential,
}

impl ProfileFunction {
    /// Units digit of the reflection flag.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Gaussian => 1,
            Self::SingleExponential => 2,
            Self::DoubleExponential => 3,
        }
    }
}

/// Per-run metadata written to the type-0/type-1 records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run_number: u32,
    /// Experiment name; output files are named `<name>_<run>.<ext>`.
    pub experiment: String,
    pub events_file: Option<PathBuf>,
    pub matrix_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Goniometer angles (degrees).
    pub chi: f64,
    pub phi: f64,
    pub omega: f64,
    pub monitor_count: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_number: 0,
            experiment: "scd".to_string(),
            events_file: None,
            matrix_file: None,
            output_dir: PathBuf::from("."),
            chi: 0.0,
            phi: 0.0,
            omega: 0.0,
            monitor_count: 0.0,
        }
    }
}

/// Instrument description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub facility: String,
    pub name: String,
    /// Moderator-to-sample distance (m).
    pub l1: f64,
    /// Time-of-flight offset (μs).
    pub t0_shift: f64,
    pub detectors: Vec<DetectorPlane>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            facility: "SNS".to_string(),
            name: "TOPAZ".to_string(),
            l1: 18.0,
            t0_shift: 0.0,
            detectors: Vec::new(),
        }
    }
}

/// Peak prediction limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub centering: Centering,
    /// Smallest d-spacing predicted (Å).
    pub d_min: f64,
    /// Wavelength window (Å).
    pub wavelength_min: f64,
    pub wavelength_max: f64,
    /// Pixels excluded at each detector edge.
    pub edge_pixels: u32,
    /// Half-angle of the detector pre-filter cone (degrees).
    pub cone_half_angle: f64,
    /// Width of one time-of-flight channel (μs) for the CHAN column.
    pub tof_channel_width: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            centering: Centering::P,
            d_min: 0.5,
            wavelength_min: 0.4,
            wavelength_max: 3.5,
            edge_pixels: 0,
            cone_half_angle: 16.0,
            tof_channel_width: 10.0,
        }
    }
}

/// Profile geometry. Lengths are in Å⁻¹ including the 2π factor, as the
/// event stream stores them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub num_steps: usize,
    /// Full length of the profile along Q.
    pub profile_length: f64,
    /// Radius of the cylinder around each peak's Q direction.
    pub cylinder_radius: f64,
    pub byte_order: ByteOrder,
    /// Accumulate event chunks in parallel.
    pub parallel: bool,
    /// Records per parallel chunk.
    pub chunk_records: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            num_steps: 100,
            profile_length: 0.3,
            cylinder_radius: 0.05,
            byte_order: ByteOrder::Little,
            parallel: true,
            chunk_records: 1 << 20,
        }
    }
}

impl ProfileConfig {
    /// Channel width in 1/d units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_width(&self) -> f64 {
        self.profile_length / self.num_steps as f64 / TAU
    }

    /// Half of the profile length in 1/d units.
    #[must_use]
    pub fn half_window(&self) -> f64 {
        self.profile_length / 2.0 / TAU
    }

    /// Cylinder radius in 1/d units.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.cylinder_radius / TAU
    }

    /// Designed center channel.
    #[must_use]
    pub fn center_channel(&self) -> usize {
        self.num_steps / 2
    }
}

/// Profile fitting and rejection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub profile_function: ProfileFunction,
    /// Weight residuals by 1/√count.
    pub weights: bool,
    pub reject_intensity_zero: bool,
    pub reject_gaussian_sigma_zero: bool,
    /// Largest allowed distance (channels) of the fitted center from the
    /// designed center.
    pub center_tolerance: f64,
    /// Write rejected peaks with the rejection code as their flag.
    pub write_rejected: bool,
    pub max_iterations: usize,
    /// Fit peaks in parallel.
    pub parallel: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            profile_function: ProfileFunction::Gaussian,
            weights: false,
            reject_intensity_zero: true,
            reject_gaussian_sigma_zero: true,
            center_tolerance: 5.0,
            write_rejected: false,
            max_iterations: 200,
            parallel: true,
        }
    }
}

impl FitConfig {
    /// Reflection flag for an accepted fit.
    ///
    /// The units digit is the [`ProfileFunction::code`]. The tens digit is the
    /// weighting scheme, 1 for unweighted and 2 for `1/√counts` weights. Older
    /// integrate files used the tens digit for the optimizer; with a single
    /// Levenberg–Marquardt solver that choice no longer exists, so a reader
    /// of those files should not map tens digit 2 to a second optimizer.
    /// Rejected peaks keep their 9x codes regardless of either setting.
    #[must_use]
    pub fn reflection_flag(&self) -> i32 {
        let tens = if self.weights { 20 } else { 10 };
        tens + self.profile_function.code()
    }
}

/// Complete configuration for one reduction run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub run: RunConfig,
    pub instrument: InstrumentConfig,
    pub prediction: PredictionConfig,
    pub profile: ProfileConfig,
    pub fit: FitConfig,
}

impl ReductionConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or validation fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values no stage can work with.
    ///
    /// Called automatically when loading from JSON. Programmatically built
    /// configs should call it before processing.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        let p = &self.prediction;
        if !(p.d_min >= MIN_D_SPACING) {
            return config_error(format!(
                "d_min must be at least {MIN_D_SPACING} Å, got {}",
                p.d_min
            ));
        }
        if !(p.wavelength_min >= 0.0 && p.wavelength_min < p.wavelength_max) {
            return config_error(format!(
                "wavelength window [{}, {}] is empty",
                p.wavelength_min, p.wavelength_max
            ));
        }
        if !(p.cone_half_angle > 0.0 && p.cone_half_angle <= 180.0) {
            return config_error(format!(
                "cone_half_angle must be in (0, 180], got {}",
                p.cone_half_angle
            ));
        }
        if !(p.tof_channel_width > 0.0) {
            return config_error("tof_channel_width must be positive".to_string());
        }

        let profile = &self.profile;
        if profile.num_steps < 2 {
            return config_error(format!(
                "num_steps must be at least 2, got {}",
                profile.num_steps
            ));
        }
        if !(profile.profile_length > 0.0) || !(profile.cylinder_radius > 0.0) {
            return config_error(
                "profile_length and cylinder_radius must be positive".to_string(),
            );
        }
        if profile.chunk_records == 0 {
            return config_error("chunk_records must be positive".to_string());
        }

        let fit = &self.fit;
        if !(fit.center_tolerance > 0.0) {
            return config_error("center_tolerance must be positive".to_string());
        }
        if fit.max_iterations == 0 {
            return config_error("max_iterations must be positive".to_string());
        }

        let instrument = &self.instrument;
        if !(instrument.l1 > 0.0) {
            return config_error(format!("l1 must be positive, got {}", instrument.l1));
        }
        let mut ids = HashSet::new();
        for detector in &instrument.detectors {
            detector.validate()?;
            if !ids.insert(detector.id) {
                return Err(Error::InvalidDetector {
                    id: detector.id,
                    reason: "duplicate detector id".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Set the run number.
    #[must_use]
    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run.run_number = run_number;
        self
    }

    /// Set the lattice centering.
    #[must_use]
    pub fn with_centering(mut self, centering: Centering) -> Self {
        self.prediction.centering = centering;
        self
    }

    /// Set the minimum d-spacing.
    #[must_use]
    pub fn with_d_min(mut self, d_min: f64) -> Self {
        self.prediction.d_min = d_min;
        self
    }

    /// Set the wavelength window.
    #[must_use]
    pub fn with_wavelength_range(mut self, min: f64, max: f64) -> Self {
        self.prediction.wavelength_min = min;
        self.prediction.wavelength_max = max;
        self
    }

    /// Replace the detector list.
    #[must_use]
    pub fn with_detectors(mut self, detectors: Vec<DetectorPlane>) -> Self {
        self.instrument.detectors = detectors;
        self
    }

    /// Set the profile geometry.
    #[must_use]
    pub fn with_profile(mut self, num_steps: usize, profile_length: f64, radius: f64) -> Self {
        self.profile.num_steps = num_steps;
        self.profile.profile_length = profile_length;
        self.profile.cylinder_radius = radius;
        self
    }

    /// Set the peak-shape model and weighting.
    #[must_use]
    pub fn with_profile_function(mut self, function: ProfileFunction, weights: bool) -> Self {
        self.fit.profile_function = function;
        self.fit.weights = weights;
        self
    }
}

fn config_error(message: String) -> Result<()> {
    Err(Error::ConfigError(message))
}
