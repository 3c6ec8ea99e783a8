//! Dense Miller-index lookup.
//!
//! Maps an integer (h, k, l) inside the prediction search box to the
//! position of its candidate peak. Every event needs one lookup, so the
//! table is a flat array rather than a hash map.

use nalgebra::Vector3;
use scdpeaks_core::{CandidatePeak, HklBounds, Result};

/// Flat `(2·hmax+1) × (2·kmax+1) × (2·lmax+1)` table of candidate ids.
///
/// Cells hold 0 when empty, otherwise the 1-based candidate position.
#[derive(Debug, Clone)]
pub struct HklIndex {
    bounds: HklBounds,
    dims: [usize; 3],
    cells: Vec<u32>,
}

impl HklIndex {
    /// Build the table for `candidates`. Candidates outside `bounds` are not
    /// indexed; a later candidate with the same indices replaces an earlier
    /// one.
    ///
    /// # Errors
    /// Returns [`scdpeaks_core::Error::SearchBoxTooLarge`] if `bounds` has a
    /// negative half-width or more than
    /// [`MAX_SEARCH_CELLS`](scdpeaks_core::lattice::MAX_SEARCH_CELLS) cells.
    pub fn build(bounds: HklBounds, candidates: &[CandidatePeak]) -> Result<Self> {
        let cells = bounds.check_size()?;
        // check_size has ruled out negative half-widths and overflow.
        let extent = |max: i32| usize::try_from(max).unwrap_or(0) * 2 + 1;
        let dims = [extent(bounds.hmax), extent(bounds.kmax), extent(bounds.lmax)];
        let mut index = Self {
            bounds,
            dims,
            cells: vec![0; cells],
        };
        for (position, peak) in candidates.iter().enumerate() {
            let Ok(id) = u32::try_from(position + 1) else {
                break;
            };
            if let Some(cell) = index.offset(peak.hkl.h, peak.hkl.k, peak.hkl.l) {
                index.cells[cell] = id;
            }
        }
        Ok(index)
    }

    /// Search box the table covers.
    #[must_use]
    pub fn bounds(&self) -> HklBounds {
        self.bounds
    }

    /// Number of occupied cells.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.cells.iter().filter(|&&id| id != 0).count()
    }

    /// Candidate position (0-based) for integer indices.
    #[inline]
    #[must_use]
    pub fn get(&self, h: i32, k: i32, l: i32) -> Option<usize> {
        let cell = self.offset(h, k, l)?;
        match self.cells[cell] {
            0 => None,
            id => Some(id as usize - 1),
        }
    }

    /// Candidate position for fractional indices, rounded to the nearest
    /// integer triple. `None` is the usual answer for events between peaks.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn lookup(&self, hkl: &Vector3<f64>) -> Option<usize> {
        let round = |value: f64, max: i32| {
            let rounded = value.round();
            // Also rejects NaN.
            if rounded.abs() <= f64::from(max) {
                Some(rounded as i32)
            } else {
                None
            }
        };
        let h = round(hkl.x, self.bounds.hmax)?;
        let k = round(hkl.y, self.bounds.kmax)?;
        let l = round(hkl.z, self.bounds.lmax)?;
        self.get(h, k, l)
    }

    #[inline]
    fn offset(&self, h: i32, k: i32, l: i32) -> Option<usize> {
        if !self.bounds.contains(h, k, l) {
            return None;
        }
        let shift = |value: i32, max: i32| usize::try_from(value + max).ok();
        let i = shift(h, self.bounds.hmax)?;
        let j = shift(k, self.bounds.kmax)?;
        let m = shift(l, self.bounds.lmax)?;
        Some((i * self.dims[1] + j) * self.dims[2] + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scdpeaks_core::Hkl;

    fn peak(h: i32, k: i32, l: i32) -> CandidatePeak {
        CandidatePeak {
            seqn: 0,
            hkl: Hkl::new(h, k, l),
            q: Vector3::zeros(),
            d_spacing: 1.0,
            wavelength: 1.0,
            two_theta: 0.0,
            azimuth: 0.0,
            detector_id: 1,
            col: 0.0,
            row: 0.0,
            l2: 0.0,
            tof: 0.0,
            intensity: 0.0,
            sigma: 0.0,
            reflection_flag: 0,
        }
    }

    #[test]
    fn test_lookup_rounds() {
        let index = HklIndex::build(
            HklBounds::new(3, 3, 3),
            &[peak(1, 0, 0), peak(-3, 2, 3), peak(0, 0, -1)],
        )
        .unwrap();
        assert_eq!(index.occupied(), 3);
        assert_eq!(index.get(1, 0, 0), Some(0));
        assert_eq!(index.lookup(&Vector3::new(0.6, 0.4, -0.2)), Some(0));
        assert_eq!(index.lookup(&Vector3::new(-2.9, 2.2, 3.4)), Some(1));
        assert_eq!(index.lookup(&Vector3::new(0.1, -0.3, -0.8)), Some(2));
        assert_eq!(index.lookup(&Vector3::new(2.0, 2.0, 2.0)), None);
    }

    #[test]
    fn test_out_of_bounds() {
        let index = HklIndex::build(HklBounds::new(2, 2, 2), &[peak(2, 2, 2), peak(5, 0, 0)]).unwrap();
        assert_eq!(index.occupied(), 1);
        assert_eq!(index.lookup(&Vector3::new(3.4, 0.0, 0.0)), None);
        assert_eq!(index.lookup(&Vector3::new(-2.6, 0.0, 0.0)), None);
        assert_eq!(index.lookup(&Vector3::new(f64::NAN, 0.0, 0.0)), None);
        assert_eq!(index.lookup(&Vector3::new(f64::INFINITY, 0.0, 0.0)), None);
        assert_eq!(index.get(2, 2, 2), Some(0));
    }

    #[test]
    fn test_later_candidate_overwrites() {
        let index = HklIndex::build(HklBounds::new(1, 1, 1), &[peak(1, 1, 1), peak(1, 1, 1)]).unwrap();
        assert_eq!(index.get(1, 1, 1), Some(1));
    }

    #[test]
    fn test_asymmetric_bounds() {
        let index = HklIndex::build(HklBounds::new(4, 1, 2), &[peak(-4, 1, -2), peak(4, -1, 2)]).unwrap();
        assert_eq!(index.get(-4, 1, -2), Some(0));
        assert_eq!(index.get(4, -1, 2), Some(1));
        assert_eq!(index.get(0, 0, 0), None);
    }

    #[test]
    fn test_oversized_box_is_refused() {
        assert!(matches!(
            HklIndex::build(HklBounds::new(2000, 2000, 2000), &[peak(0, 0, 1)]),
            Err(scdpeaks_core::Error::SearchBoxTooLarge { hmax: 2000, .. })
        ));
        assert!(HklIndex::build(HklBounds::new(i32::MAX, 1, 1), &[]).is_err());
        assert!(HklIndex::build(HklBounds::new(-1, 1, 1), &[]).is_err());
    }
}
