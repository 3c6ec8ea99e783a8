//! Per-peak Q profiles.
//!
//! A [`Profile`] is a fixed-length histogram of event counts along the
//! scattering direction of one predicted peak. [`ProfileSet`] holds one
//! profile per candidate and is filled by a single pass over the events;
//! partial sets built from disjoint event chunks combine with
//! [`ProfileSet::merge`].

use crate::{Error, Result};

/// Histogram of counts along one peak's scattering direction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    counts: Vec<u32>,
}

impl Profile {
    /// Creates a zeroed profile with `num_steps` channels.
    #[must_use]
    pub fn new(num_steps: usize) -> Self {
        Self {
            counts: vec![0; num_steps],
        }
    }

    /// Wraps existing counts.
    #[must_use]
    pub fn from_counts(counts: Vec<u32>) -> Self {
        Self { counts }
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if the profile has no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Channel counts.
    #[must_use]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Adds one count to `channel`; out-of-range channels are ignored.
    ///
    /// Returns whether the count was recorded.
    #[inline]
    pub fn increment(&mut self, channel: usize) -> bool {
        match self.counts.get_mut(channel) {
            Some(count) => {
                *count = count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Sum of all channels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    /// Largest channel count.
    #[must_use]
    pub fn max(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Adds another profile channel by channel.
    ///
    /// # Errors
    /// Returns an error if the lengths differ.
    pub fn merge(&mut self, other: &Profile) -> Result<()> {
        if self.len() != other.len() {
            return Err(Error::ProfileLength {
                expected: self.len(),
                actual: other.len(),
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a = a.saturating_add(*b);
        }
        Ok(())
    }
}

/// One profile per candidate peak, indexed like the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSet {
    num_steps: usize,
    profiles: Vec<Profile>,
}

impl ProfileSet {
    /// Creates `num_peaks` zeroed profiles of `num_steps` channels each.
    #[must_use]
    pub fn new(num_peaks: usize, num_steps: usize) -> Self {
        Self {
            num_steps,
            profiles: vec![Profile::new(num_steps); num_peaks],
        }
    }

    /// Channels per profile.
    #[must_use]
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns true if the set holds no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profile of the candidate at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Profile> {
        self.profiles.get(index)
    }

    /// All profiles in candidate order.
    #[must_use]
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// Records one count for candidate `index` at `channel`.
    #[inline]
    pub fn increment(&mut self, index: usize, channel: usize) -> bool {
        self.profiles
            .get_mut(index)
            .is_some_and(|profile| profile.increment(channel))
    }

    /// Total counts across every profile.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.profiles.iter().map(Profile::total).sum()
    }

    /// Adds a partial set built from a disjoint slice of the event stream.
    ///
    /// # Errors
    /// Returns an error if the shapes differ.
    pub fn merge(&mut self, other: &ProfileSet) -> Result<()> {
        if self.profiles.len() != other.profiles.len() {
            return Err(Error::ProfileLength {
                expected: self.profiles.len(),
                actual: other.profiles.len(),
            });
        }
        for (a, b) in self.profiles.iter_mut().zip(&other.profiles) {
            a.merge(b)?;
        }
        Ok(())
    }

    /// Consumes the set, returning its profiles.
    #[must_use]
    pub fn into_profiles(self) -> Vec<Profile> {
        self.profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_increment() {
        let mut profile = Profile::new(10);
        assert!(profile.increment(0));
        assert!(profile.increment(9));
        assert!(profile.increment(9));
        assert!(!profile.increment(10));
        assert_eq!(profile.total(), 3);
        assert_eq!(profile.max(), 2);
        assert_eq!(profile.counts()[9], 2);
    }

    #[test]
    fn test_profile_set_merge() {
        let mut a = ProfileSet::new(2, 4);
        let mut b = ProfileSet::new(2, 4);
        a.increment(0, 1);
        b.increment(0, 1);
        b.increment(1, 3);
        a.merge(&b).unwrap();
        assert_eq!(a.get(0).unwrap().counts(), &[0, 2, 0, 0]);
        assert_eq!(a.get(1).unwrap().counts(), &[0, 0, 0, 1]);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_profile_set_shape_mismatch() {
        let mut a = ProfileSet::new(2, 4);
        assert!(a.merge(&ProfileSet::new(3, 4)).is_err());
        assert!(a.merge(&ProfileSet::new(2, 5)).is_err());
    }

    #[test]
    fn test_increment_unknown_peak() {
        let mut set = ProfileSet::new(1, 4);
        assert!(!set.increment(5, 0));
        assert_eq!(set.total(), 0);
    }
}
