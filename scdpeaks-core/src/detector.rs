//! Flat area detector geometry.
//!
//! Positions are in meters in the sample frame: beam along +x, z vertical.
#![allow(clippy::cast_precision_loss, clippy::cast_lossless)]

use crate::{Error, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Tolerance for the base/up unit-vector checks.
const UNIT_TOLERANCE: f64 = 1e-3;

/// Position of a scattered ray on a detector face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorHit {
    /// Column, 1-based, fractional.
    pub col: f64,
    /// Row, 1-based, fractional.
    pub row: f64,
    /// Sample-to-pixel distance (m).
    pub l2: f64,
}

/// A rectangular detector plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPlane {
    /// Detector id written to the reflection file.
    pub id: u32,
    /// Number of pixel rows (along `up`).
    pub rows: u32,
    /// Number of pixel columns (along `base`).
    pub cols: u32,
    /// Active width along `base` (m).
    pub width: f64,
    /// Active height along `up` (m).
    pub height: f64,
    /// Depth of the active volume (m).
    #[serde(default)]
    pub depth: f64,
    /// Center of the detector face relative to the sample (m).
    pub center: [f64; 3],
    /// Unit vector along increasing column.
    pub base: [f64; 3],
    /// Unit vector along increasing row.
    pub up: [f64; 3],
}

impl DetectorPlane {
    /// Center position as a vector.
    #[must_use]
    pub fn center(&self) -> Vector3<f64> {
        Vector3::from(self.center)
    }

    /// Base unit vector.
    #[must_use]
    pub fn base(&self) -> Vector3<f64> {
        Vector3::from(self.base)
    }

    /// Up unit vector.
    #[must_use]
    pub fn up(&self) -> Vector3<f64> {
        Vector3::from(self.up)
    }

    /// Face normal, `base × up`.
    #[must_use]
    pub fn normal(&self) -> Vector3<f64> {
        self.base().cross(&self.up())
    }

    /// Sample-to-center distance (m).
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.center().norm()
    }

    /// Checks that the plane is usable for projection.
    ///
    /// # Errors
    /// Returns an error for empty pixel grids, non-positive sizes, a detector at
    /// the sample position, or base/up vectors that are not orthonormal.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(Error::InvalidDetector {
                id: self.id,
                reason: reason.to_string(),
            })
        };
        if self.rows == 0 || self.cols == 0 {
            return fail("pixel grid must have at least one row and column");
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return fail("width and height must be positive");
        }
        if !(self.distance() > 0.0) {
            return fail("center must not coincide with the sample");
        }
        if (self.base().norm() - 1.0).abs() > UNIT_TOLERANCE
            || (self.up().norm() - 1.0).abs() > UNIT_TOLERANCE
        {
            return fail("base and up must be unit vectors");
        }
        if self.base().dot(&self.up()).abs() > UNIT_TOLERANCE {
            return fail("base and up must be orthogonal");
        }
        Ok(())
    }

    /// Returns true when `direction` lies within `half_angle` (radians) of the
    /// direction to the detector center.
    #[must_use]
    pub fn within_cone(&self, direction: &Vector3<f64>, half_angle: f64) -> bool {
        let center = self.center();
        let cos = center.dot(direction) / (center.norm() * direction.norm());
        cos.clamp(-1.0, 1.0).acos() <= half_angle
    }

    /// Intersects a ray from the sample with the detector face.
    ///
    /// Returns `None` if the ray runs parallel to or away from the face, or if
    /// the hit falls outside the active area shrunk by `edge_pixels` on every
    /// side.
    #[must_use]
    pub fn project(&self, direction: &Vector3<f64>, edge_pixels: u32) -> Option<DetectorHit> {
        let normal = self.normal();
        let center = self.center();
        let denom = direction.dot(&normal);
        if denom.abs() < f64::EPSILON {
            return None;
        }
        let t = center.dot(&normal) / denom;
        if !(t > 0.0) {
            return None;
        }
        let point = direction * t;
        let offset = point - center;

        let cols = self.cols as f64;
        let rows = self.rows as f64;
        let col = offset.dot(&self.base()) / self.width * cols + (cols + 1.0) / 2.0;
        let row = offset.dot(&self.up()) / self.height * rows + (rows + 1.0) / 2.0;

        let edge = edge_pixels as f64;
        if col < 1.0 + edge || col > cols - edge || row < 1.0 + edge || row > rows - edge {
            return None;
        }
        Some(DetectorHit {
            col,
            row,
            l2: point.norm(),
        })
    }
}
