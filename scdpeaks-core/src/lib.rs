//! scdpeaks-core: Core types for single-crystal peak integration.
//!
//! This crate provides the lattice and orientation types, detector geometry,
//! predicted peaks, per-peak Q profiles and the reduction configuration
//! shared by the algorithm, I/O and command-line crates.
//!

pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod lattice;
pub mod peak;
pub mod profile;

pub use config::{
    ByteOrder, FitConfig, InstrumentConfig, PredictionConfig, ProfileConfig, ProfileFunction,
    ReductionConfig, RunConfig,
};
pub use detector::{DetectorHit, DetectorPlane};
pub use error::{Error, Result};
pub use event::{EventRecord, RECORD_SIZE};
pub use lattice::{Centering, HklBounds, OrientationMatrix, UnitCell};
pub use peak::{CandidatePeak, Hkl};
pub use profile::{Profile, ProfileSet};
