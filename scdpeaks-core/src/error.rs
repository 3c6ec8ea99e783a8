//! Error types for scdpeaks-core.

use thiserror::Error;

/// Result type alias for scdpeaks operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for scdpeaks operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown lattice centering symbol.
    #[error("invalid centering symbol: {0:?} (expected one of P, A, B, C, F, I, R)")]
    InvalidCentering(String),

    /// Orientation matrix cannot be inverted.
    #[error("orientation matrix is singular (determinant {0:e})")]
    SingularOrientation(f64),

    /// Invalid lattice parameter.
    #[error("invalid lattice parameter {name} = {value}")]
    InvalidLattice { name: &'static str, value: f64 },

    /// Invalid detector geometry.
    #[error("detector {id}: {reason}")]
    InvalidDetector { id: u32, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Configuration file could not be read.
    #[error("configuration I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Profile length mismatch.
    #[error("profile length mismatch: expected {expected}, got {actual}")]
    ProfileLength { expected: usize, actual: usize },

    /// Miller-index search box too large to index densely.
    #[error("Miller-index search box ±{hmax} x ±{kmax} x ±{lmax} is too large; raise d_min")]
    SearchBoxTooLarge { hmax: i32, kmax: i32, lmax: i32 },
}
