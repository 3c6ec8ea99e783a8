//! Lattice types: centering conditions, unit cell bounds and the orientation matrix.
#![allow(clippy::cast_possible_truncation)]

use crate::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Determinants below this magnitude are treated as singular.
const SINGULAR_DETERMINANT: f64 = 1e-12;

/// Bravais lattice centering.
///
/// Each variant carries the reflection condition that decides whether a
/// Miller-index triple can produce a Bragg peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Centering {
    /// Primitive.
    #[default]
    P,
    /// A-face centered.
    A,
    /// B-face centered.
    B,
    /// C-face centered.
    C,
    /// All-face centered.
    F,
    /// Body centered.
    I,
    /// Rhombohedral (obverse setting).
    R,
}

impl Centering {
    /// Returns true when the reflection (h, k, l) is allowed by this centering.
    #[must_use]
    pub fn allows(self, h: i32, k: i32, l: i32) -> bool {
        match self {
            Self::P => true,
            Self::A => (k + l).rem_euclid(2) == 0,
            Self::B => (h + l).rem_euclid(2) == 0,
            Self::C => (h + k).rem_euclid(2) == 0,
            Self::F => {
                (h + k).rem_euclid(2) == 0
                    && (h + l).rem_euclid(2) == 0
                    && (k + l).rem_euclid(2) == 0
            }
            Self::I => (h + k + l).rem_euclid(2) == 0,
            Self::R => (-h + k + l).rem_euclid(3) == 0,
        }
    }

    /// One-letter symbol.
    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            Self::P => 'P',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::F => 'F',
            Self::I => 'I',
            Self::R => 'R',
        }
    }
}

impl FromStr for Centering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" => Ok(Self::P),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "F" => Ok(Self::F),
            "I" => Ok(Self::I),
            "R" => Ok(Self::R),
            _ => Err(Error::InvalidCentering(s.to_string())),
        }
    }
}

impl TryFrom<String> for Centering {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Centering> for String {
    fn from(value: Centering) -> Self {
        value.symbol().to_string()
    }
}

impl fmt::Display for Centering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Half-widths of the Miller-index search box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HklBounds {
    pub hmax: i32,
    pub kmax: i32,
    pub lmax: i32,
}

/// Largest search box, in integer triples, a dense index may cover.
pub const MAX_SEARCH_CELLS: usize = 1 << 27;

impl HklBounds {
    /// Creates bounds from the three half-widths.
    #[must_use]
    pub fn new(hmax: i32, kmax: i32, lmax: i32) -> Self {
        Self { hmax, kmax, lmax }
    }

    /// Returns true when the triple lies inside the box.
    #[inline]
    #[must_use]
    pub fn contains(&self, h: i32, k: i32, l: i32) -> bool {
        h.abs() <= self.hmax && k.abs() <= self.kmax && l.abs() <= self.lmax
    }

    /// Number of integer triples in the box, `None` on overflow or a
    /// negative half-width.
    #[must_use]
    pub fn cell_count(&self) -> Option<usize> {
        let extent = |max: i32| -> Option<usize> {
            usize::try_from(max).ok()?.checked_mul(2)?.checked_add(1)
        };
        extent(self.hmax)?
            .checked_mul(extent(self.kmax)?)?
            .checked_mul(extent(self.lmax)?)
    }

    /// Checks that the box fits in [`MAX_SEARCH_CELLS`].
    ///
    /// # Errors
    /// Returns [`Error::SearchBoxTooLarge`] otherwise.
    pub fn check_size(&self) -> Result<usize> {
        match self.cell_count() {
            Some(cells) if cells <= MAX_SEARCH_CELLS => Ok(cells),
            _ => Err(Error::SearchBoxTooLarge {
                hmax: self.hmax,
                kmax: self.kmax,
                lmax: self.lmax,
            }),
        }
    }
}

/// Unit cell edge lengths (Å) with optional angles and volume.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub volume: Option<f64>,
}

impl UnitCell {
    /// Creates a cell with right angles.
    ///
    /// # Errors
    /// Returns an error if any edge is not a positive finite length.
    pub fn new(a: f64, b: f64, c: f64) -> Result<Self> {
        for (name, value) in [("a", a), ("b", b), ("c", c)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidLattice { name, value });
            }
        }
        Ok(Self {
            a,
            b,
            c,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
            volume: None,
        })
    }

    /// Sets the cell angles in degrees.
    #[must_use]
    pub fn with_angles(mut self, alpha: f64, beta: f64, gamma: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self.gamma = gamma;
        self
    }

    /// Sets the cell volume in Å³.
    #[must_use]
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Search box for reflections with d-spacing at or above `d_min`.
    ///
    /// Along each axis no reflection with `|h| > a / d_min` can reach `d_min`,
    /// so the bound is `ceil(a / d_min)`.
    #[must_use]
    pub fn hkl_bounds(&self, d_min: f64) -> HklBounds {
        let bound = |edge: f64| (edge / d_min).ceil().max(0.0) as i32;
        HklBounds::new(bound(self.a), bound(self.b), bound(self.c))
    }
}

/// Orientation (UB) matrix mapping Miller indices to reciprocal space.
///
/// `Q = (h, k, l) · UB` with `(h, k, l)` as a row vector; Q is in units of
/// 1/d (no factor of 2π). The inverse is computed once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationMatrix {
    ub: Matrix3<f64>,
    ub_inv: Matrix3<f64>,
}

impl OrientationMatrix {
    /// Creates an orientation matrix from its rows.
    ///
    /// # Errors
    /// Returns an error if the matrix is singular or contains non-finite values.
    pub fn new(ub: Matrix3<f64>) -> Result<Self> {
        let det = ub.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_DETERMINANT {
            return Err(Error::SingularOrientation(det));
        }
        let ub_inv = ub.try_inverse().ok_or(Error::SingularOrientation(det))?;
        Ok(Self { ub, ub_inv })
    }

    /// Creates an orientation matrix from row-major values.
    ///
    /// # Errors
    /// Returns an error if the matrix is singular.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Result<Self> {
        Self::new(Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ))
    }

    /// The UB matrix as stored (rows as read from the matrix file).
    #[must_use]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.ub
    }

    /// The cached inverse.
    #[must_use]
    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.ub_inv
    }

    /// Scattering vector of an integer reflection.
    #[inline]
    #[must_use]
    pub fn q_vector(&self, h: i32, k: i32, l: i32) -> Vector3<f64> {
        self.ub
            .tr_mul(&Vector3::new(f64::from(h), f64::from(k), f64::from(l)))
    }

    /// Fractional Miller indices of a scattering vector (1/d units).
    #[inline]
    #[must_use]
    pub fn hkl_of(&self, q: &Vector3<f64>) -> Vector3<f64> {
        self.ub_inv.tr_mul(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_centering_conditions() {
        assert!(Centering::P.allows(1, 0, 0));
        assert!(!Centering::I.allows(1, 0, 0));
        assert!(Centering::I.allows(1, 1, 0));
        assert!(!Centering::F.allows(1, 1, 0));
        assert!(Centering::F.allows(1, 1, 1));
        assert!(Centering::F.allows(2, 0, 0));
        assert!(Centering::C.allows(1, 1, 5));
        assert!(!Centering::C.allows(1, 0, 5));
        assert!(Centering::A.allows(3, 1, -1));
        assert!(Centering::B.allows(-1, 4, 1));
        assert!(Centering::R.allows(1, 1, 0));
        assert!(!Centering::R.allows(1, 0, 0));
    }

    #[test]
    fn test_centering_negative_indices() {
        // -h+k+l = 3 for (-1, 1, 1); = -3 for (1, -1, -1)
        assert!(Centering::R.allows(-1, 1, 1));
        assert!(Centering::R.allows(1, -1, -1));
        assert!(Centering::I.allows(-1, -1, 0));
        assert!(!Centering::I.allows(-1, 0, 0));
    }

    #[test]
    fn test_centering_is_pure() {
        for centering in [
            Centering::P,
            Centering::A,
            Centering::B,
            Centering::C,
            Centering::F,
            Centering::I,
            Centering::R,
        ] {
            for h in -4..=4 {
                for k in -4..=4 {
                    for l in -4..=4 {
                        let first = centering.allows(h, k, l);
                        assert_eq!(first, centering.allows(h, k, l));
                    }
                }
            }
        }
    }

    #[test]
    fn test_centering_parse() {
        assert_eq!("f".parse::<Centering>().unwrap(), Centering::F);
        assert_eq!(" R ".parse::<Centering>().unwrap(), Centering::R);
        assert!("X".parse::<Centering>().is_err());
        assert_eq!(String::from(Centering::I), "I");
    }

    #[test]
    fn test_hkl_bounds() {
        let cell = UnitCell::new(5.0, 5.0, 5.0).unwrap();
        assert_eq!(cell.hkl_bounds(1.0), HklBounds::new(5, 5, 5));

        let cell = UnitCell::new(10.2, 7.5, 4.0).unwrap();
        assert_eq!(cell.hkl_bounds(0.7), HklBounds::new(15, 11, 6));
    }

    #[test]
    fn test_search_box_size() {
        assert_eq!(HklBounds::new(1, 2, 0).cell_count(), Some(15));
        assert_eq!(HklBounds::new(-1, 2, 0).cell_count(), None);
        assert_eq!(HklBounds::new(i32::MAX, i32::MAX, i32::MAX).cell_count(), None);
        assert_eq!(HklBounds::new(100, 100, 100).check_size().unwrap(), 201 * 201 * 201);
        assert!(matches!(
            HklBounds::new(1000, 1000, 1000).check_size(),
            Err(Error::SearchBoxTooLarge { hmax: 1000, .. })
        ));
        // A huge cell at a tiny d_min overflows rather than wrapping.
        let cell = UnitCell::new(1.0e6, 1.0e6, 1.0e6).unwrap();
        assert!(cell.hkl_bounds(1e-3).check_size().is_err());
    }

    #[test]
    fn test_unit_cell_rejects_bad_edges() {
        assert!(UnitCell::new(0.0, 1.0, 1.0).is_err());
        assert!(UnitCell::new(1.0, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_orientation_round_trip() {
        let ub = OrientationMatrix::from_rows([
            [0.01, 0.15, -0.02],
            [-0.12, 0.03, 0.05],
            [0.04, -0.01, 0.11],
        ])
        .unwrap();
        let q = ub.q_vector(3, -2, 5);
        let hkl = ub.hkl_of(&q);
        assert_relative_eq!(hkl.x, 3.0, epsilon = 1e-10);
        assert_relative_eq!(hkl.y, -2.0, epsilon = 1e-10);
        assert_relative_eq!(hkl.z, 5.0, epsilon = 1e-10);
    }

    #[test]
    fn test_q_vector_is_row_times_matrix() {
        let ub = OrientationMatrix::from_rows([[1.0, 2.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
            .unwrap();
        // (1, 0, 0) selects the first row.
        let q = ub.q_vector(1, 0, 0);
        assert_relative_eq!(q.x, 1.0);
        assert_relative_eq!(q.y, 2.0);
        assert_relative_eq!(q.z, 0.0);
    }

    #[test]
    fn test_singular_orientation() {
        let result = OrientationMatrix::from_rows([[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        assert!(matches!(result, Err(Error::SingularOrientation(_))));
    }
}
