//! Event-to-profile projection.
//!
//! Each event's scattering vector is indexed back to the nearest candidate
//! peak and, if it falls inside that peak's cylinder, binned by its offset
//! along the peak's Q direction. Lengths are in 1/d units; raw events carry
//! the 2π factor and are scaled on the way in.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::index::HklIndex;
use log::debug;
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use scdpeaks_core::config::{ByteOrder, ProfileConfig};
use scdpeaks_core::event::{decode_records, EventRecord, RECORD_SIZE};
use scdpeaks_core::{CandidatePeak, OrientationMatrix, ProfileSet};
use std::f64::consts::TAU;

/// Cylinder acceptance: an event exactly on the surface is outside.
#[inline]
#[must_use]
pub fn within_cylinder(perpendicular: f64, radius: f64) -> bool {
    perpendicular < radius
}

/// Profile geometry in 1/d units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionGeometry {
    /// Channels per profile.
    pub num_steps: usize,
    /// Channel width.
    pub bin_width: f64,
    /// Largest accepted |parallel offset|.
    pub half_window: f64,
    /// Cylinder radius.
    pub radius: f64,
    /// Per-component limit of the bounding-box pre-filter.
    pub box_limit: f64,
}

impl ProjectionGeometry {
    /// Scale profile settings into 1/d units.
    #[must_use]
    pub fn from_config(profile: &ProfileConfig) -> Self {
        let length = profile.profile_length / TAU;
        let half_window = profile.half_window();
        let radius = profile.radius();
        Self {
            num_steps: profile.num_steps,
            bin_width: profile.bin_width(),
            half_window,
            radius,
            box_limit: (0.6 * length).max(half_window.hypot(radius)),
        }
    }
}

/// Where one event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Counted in a profile channel.
    Binned {
        /// Candidate position (0-based).
        peak: usize,
        /// Profile channel.
        channel: usize,
    },
    /// No candidate at the rounded indices.
    NoCandidate,
    /// Failed the bounding-box pre-filter.
    OutsideBox,
    /// Too far from the peak's Q direction.
    OutsideCylinder,
    /// Too far along the peak's Q direction.
    OutsideWindow,
    /// Rounded channel outside the profile.
    ChannelOutOfRange,
    /// Non-finite input or intermediate value.
    NonFinite,
}

/// Per-outcome event counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStatistics {
    /// Events read.
    pub events: u64,
    /// Events counted into a profile.
    pub binned: u64,
    /// Events with no candidate at their rounded indices.
    pub no_candidate: u64,
    /// Events rejected by the bounding box.
    pub outside_box: u64,
    /// Events outside the cylinder.
    pub outside_cylinder: u64,
    /// Events outside the profile window.
    pub outside_window: u64,
    /// Events whose channel fell outside the profile.
    pub channel_out_of_range: u64,
    /// Events with non-finite values.
    pub non_finite: u64,
}

impl ProjectionStatistics {
    /// Tally one outcome.
    #[inline]
    pub fn record(&mut self, projection: Projection) {
        self.events += 1;
        match projection {
            Projection::Binned { .. } => self.binned += 1,
            Projection::NoCandidate => self.no_candidate += 1,
            Projection::OutsideBox => self.outside_box += 1,
            Projection::OutsideCylinder => self.outside_cylinder += 1,
            Projection::OutsideWindow => self.outside_window += 1,
            Projection::ChannelOutOfRange => self.channel_out_of_range += 1,
            Projection::NonFinite => self.non_finite += 1,
        }
    }

    /// Add counts from another partial run.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.binned += other.binned;
        self.no_candidate += other.no_candidate;
        self.outside_box += other.outside_box;
        self.outside_cylinder += other.outside_cylinder;
        self.outside_window += other.outside_window;
        self.channel_out_of_range += other.channel_out_of_range;
        self.non_finite += other.non_finite;
    }

    /// Events read but not binned.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.events - self.binned
    }
}

/// Bins events into per-peak profiles.
pub struct EventProjector<'a> {
    ub_inv: Matrix3<f64>,
    index: &'a HklIndex,
    candidates: &'a [CandidatePeak],
    geometry: ProjectionGeometry,
}

impl<'a> EventProjector<'a> {
    /// Create a projector over `candidates`, indexed by `index`.
    #[must_use]
    pub fn new(
        orientation: &OrientationMatrix,
        index: &'a HklIndex,
        candidates: &'a [CandidatePeak],
        profile: &ProfileConfig,
    ) -> Self {
        Self {
            ub_inv: *orientation.inverse(),
            index,
            candidates,
            geometry: ProjectionGeometry::from_config(profile),
        }
    }

    /// Geometry in use.
    #[must_use]
    pub fn geometry(&self) -> &ProjectionGeometry {
        &self.geometry
    }

    /// Classify one event.
    #[must_use]
    pub fn project(&self, event: &EventRecord) -> Projection {
        if !event.is_finite() {
            return Projection::NonFinite;
        }
        let q = scattering_vector(event);

        let hkl = self.ub_inv.tr_mul(&q);
        let Some(position) = self.index.lookup(&hkl) else {
            return Projection::NoCandidate;
        };
        let Some(peak) = self.candidates.get(position) else {
            return Projection::NoCandidate;
        };

        let offset = q - peak.q;
        if offset.iter().any(|c| c.abs() > self.geometry.box_limit) {
            return Projection::OutsideBox;
        }

        let Some((perpendicular, delta)) = decompose(&q, &peak.q) else {
            return Projection::NonFinite;
        };
        if !within_cylinder(perpendicular, self.geometry.radius) {
            return Projection::OutsideCylinder;
        }

        if delta.abs() > self.geometry.half_window {
            return Projection::OutsideWindow;
        }

        let steps = (delta / self.geometry.bin_width).round();
        if !steps.is_finite() {
            return Projection::NonFinite;
        }
        let channel = steps as i64 + (self.geometry.num_steps / 2) as i64;
        match usize::try_from(channel) {
            Ok(channel) if channel < self.geometry.num_steps => Projection::Binned {
                peak: position,
                channel,
            },
            _ => Projection::ChannelOutOfRange,
        }
    }

    /// Accumulate a stream of events on the current thread.
    pub fn accumulate<I>(&self, events: I) -> (ProfileSet, ProjectionStatistics)
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mut profiles = self.empty_profiles();
        let mut stats = ProjectionStatistics::default();
        self.accumulate_into(events, &mut profiles, &mut stats);
        (profiles, stats)
    }

    /// Accumulate raw records in parallel, `chunk_records` records per task.
    ///
    /// Bit-identical to decoding `bytes` and calling [`Self::accumulate`]:
    /// every count is an integer sum. A trailing partial record is ignored.
    ///
    /// # Errors
    /// Returns [`scdpeaks_core::Error::ProfileLength`] if two partial sets
    /// disagree in shape.
    pub fn accumulate_bytes(
        &self,
        bytes: &[u8],
        order: ByteOrder,
        chunk_records: usize,
    ) -> scdpeaks_core::Result<(ProfileSet, ProjectionStatistics)> {
        let chunk_bytes = chunk_records.max(1) * RECORD_SIZE;
        let (profiles, stats) = bytes
            .par_chunks(chunk_bytes)
            .fold(
                || (self.empty_profiles(), ProjectionStatistics::default()),
                |(mut profiles, mut stats), chunk| {
                    self.accumulate_into(decode_records(chunk, order), &mut profiles, &mut stats);
                    (profiles, stats)
                },
            )
            .map(Ok::<_, scdpeaks_core::Error>)
            .try_reduce(
                || (self.empty_profiles(), ProjectionStatistics::default()),
                |(mut profiles, mut stats), (other_profiles, other_stats)| {
                    profiles.merge(&other_profiles)?;
                    stats.merge(&other_stats);
                    Ok((profiles, stats))
                },
            )?;
        debug!(
            "Projected {} events: {} binned, {} no candidate, {} outside box, {} outside cylinder, {} outside window, {} channel out of range, {} non-finite",
            stats.events,
            stats.binned,
            stats.no_candidate,
            stats.outside_box,
            stats.outside_cylinder,
            stats.outside_window,
            stats.channel_out_of_range,
            stats.non_finite
        );
        Ok((profiles, stats))
    }

    fn empty_profiles(&self) -> ProfileSet {
        ProfileSet::new(self.candidates.len(), self.geometry.num_steps)
    }

    fn accumulate_into<I>(&self, events: I, profiles: &mut ProfileSet, stats: &mut ProjectionStatistics)
    where
        I: IntoIterator<Item = EventRecord>,
    {
        for event in events {
            let projection = self.project(&event);
            if let Projection::Binned { peak, channel } = projection {
                profiles.increment(peak, channel);
            }
            stats.record(projection);
        }
    }
}

/// Event Q in 1/d units.
fn scattering_vector(event: &EventRecord) -> Vector3<f64> {
    Vector3::new(
        f64::from(event.qx),
        f64::from(event.qy),
        f64::from(event.qz),
    ) / TAU
}

/// Split `q` into its distance from the `peak` direction and its parallel
/// offset from `|peak|`. `None` when the angle is undefined.
fn decompose(q: &Vector3<f64>, peak: &Vector3<f64>) -> Option<(f64, f64)> {
    let q_norm = q.norm();
    let peak_norm = peak.norm();
    let cos_angle = q.dot(peak) / (q_norm * peak_norm);
    if !cos_angle.is_finite() {
        return None;
    }
    let angle = cos_angle.clamp(-1.0, 1.0).acos();
    Some((q_norm * angle.sin(), q_norm * angle.cos() - peak_norm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::PeakPredictor;
    use scdpeaks_core::{DetectorPlane, Hkl, ReductionConfig, UnitCell};

    struct Fixture {
        orientation: OrientationMatrix,
        config: ReductionConfig,
        peaks: Vec<CandidatePeak>,
        index: HklIndex,
    }

    fn fixture() -> Fixture {
        let orientation =
            OrientationMatrix::from_rows([[0.5, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.0, 0.5]])
                .unwrap();
        let cell = UnitCell::new(2.0, 2.0, 2.0).unwrap();
        let detector = DetectorPlane {
            id: 17,
            rows: 256,
            cols: 256,
            width: 0.2,
            height: 0.2,
            depth: 0.0,
            center: [0.0, 0.4, 0.0],
            base: [1.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
        };
        let config = ReductionConfig::default()
            .with_d_min(0.5)
            .with_detectors(vec![detector])
            .with_profile(100, 0.3, 0.05);
        let predictor = PeakPredictor::new(&orientation, &cell, &config);
        let peaks = predictor.predict();
        let index = HklIndex::build(predictor.bounds(), &peaks).unwrap();
        Fixture {
            orientation,
            config,
            peaks,
            index,
        }
    }

    fn position(peaks: &[CandidatePeak], hkl: Hkl) -> usize {
        peaks.iter().position(|p| p.hkl == hkl).unwrap()
    }

    fn event_at(q: Vector3<f64>) -> EventRecord {
        let raw = q * TAU;
        EventRecord::new(raw.x as f32, raw.y as f32, raw.z as f32)
    }

    #[test]
    fn test_cylinder_boundary_is_exclusive() {
        assert!(!within_cylinder(0.05, 0.05));
        assert!(within_cylinder(0.049_999_999, 0.05));
        assert!(!within_cylinder(f64::NAN, 0.05));
    }

    #[test]
    fn test_events_at_peak_fill_center_channel() {
        let f = fixture();
        let target = position(&f.peaks, Hkl::new(-1, 1, 0));
        let projector = EventProjector::new(&f.orientation, &f.index, &f.peaks, &f.config.profile);

        let event = event_at(f.peaks[target].q);
        let (profiles, stats) = projector.accumulate(std::iter::repeat(event).take(1000));

        assert_eq!(stats.events, 1000);
        assert_eq!(stats.binned, 1000);
        let profile = profiles.get(target).unwrap();
        assert_eq!(profile.counts()[50], 1000);
        assert_eq!(profile.total(), 1000);
        assert_eq!(profiles.total(), 1000);
    }

    #[test]
    fn test_rejection_reasons() {
        let f = fixture();
        let projector = EventProjector::new(&f.orientation, &f.index, &f.peaks, &f.config.profile);
        let q = Vector3::new(-0.5, 0.5, 0.0);
        let direction = q.normalize();

        assert!(matches!(
            projector.project(&event_at(q + Vector3::new(0.0, 0.0, 0.005))),
            Projection::Binned { channel: 50, .. }
        ));
        assert_eq!(
            projector.project(&event_at(q + Vector3::new(0.0, 0.0, 0.01))),
            Projection::OutsideCylinder
        );
        assert_eq!(
            projector.project(&event_at(q + Vector3::new(0.0, 0.0, 0.04))),
            Projection::OutsideBox
        );
        assert_eq!(
            projector.project(&event_at(q * 1.05)),
            Projection::OutsideWindow
        );
        assert_eq!(
            projector.project(&event_at(q + direction * 0.0237)),
            Projection::ChannelOutOfRange
        );
        assert!(matches!(
            projector.project(&event_at(q - direction * 0.0237)),
            Projection::Binned { channel: 0, .. }
        ));
        // Forward scattering: Qx > 0 is never predicted.
        assert_eq!(
            projector.project(&event_at(Vector3::new(0.5, 0.5, 0.0))),
            Projection::NoCandidate
        );
        assert_eq!(
            projector.project(&EventRecord::new(f32::NAN, 1.0, 1.0)),
            Projection::NonFinite
        );
    }

    fn with_geometry<'a>(f: &'a Fixture, geometry: ProjectionGeometry) -> EventProjector<'a> {
        EventProjector {
            ub_inv: *f.orientation.inverse(),
            index: &f.index,
            candidates: &f.peaks,
            geometry,
        }
    }

    #[test]
    fn test_event_on_cylinder_surface_is_outside() {
        let f = fixture();
        let target = position(&f.peaks, Hkl::new(-1, 1, 0));
        let peak_q = f.peaks[target].q;
        let event = event_at(peak_q + Vector3::new(0.0, 0.0, 0.005));
        let (perpendicular, _) = decompose(&scattering_vector(&event), &peak_q).unwrap();
        let base = ProjectionGeometry::from_config(&f.config.profile);
        assert!(perpendicular < base.radius);

        let on_surface = with_geometry(
            &f,
            ProjectionGeometry {
                radius: perpendicular,
                ..base
            },
        );
        assert_eq!(on_surface.project(&event), Projection::OutsideCylinder);

        let just_inside = with_geometry(
            &f,
            ProjectionGeometry {
                radius: perpendicular * (1.0 + 1e-12),
                ..base
            },
        );
        assert!(matches!(
            just_inside.project(&event),
            Projection::Binned { peak, channel: 50 } if peak == target
        ));
    }

    #[test]
    fn test_event_on_box_edge_is_inside() {
        let f = fixture();
        let target = position(&f.peaks, Hkl::new(-1, 1, 0));
        let peak_q = f.peaks[target].q;
        let event = event_at(peak_q + Vector3::new(0.002, -0.001, 0.004));
        let edge = (scattering_vector(&event) - peak_q).amax();
        let base = ProjectionGeometry::from_config(&f.config.profile);

        let on_edge = with_geometry(
            &f,
            ProjectionGeometry {
                box_limit: edge,
                ..base
            },
        );
        assert!(matches!(
            on_edge.project(&event),
            Projection::Binned { peak, .. } if peak == target
        ));

        let inside_edge = with_geometry(
            &f,
            ProjectionGeometry {
                box_limit: edge * (1.0 - 1e-12),
                ..base
            },
        );
        assert_eq!(inside_edge.project(&event), Projection::OutsideBox);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let f = fixture();
        let projector = EventProjector::new(&f.orientation, &f.index, &f.peaks, &f.config.profile);

        let mut bytes = Vec::new();
        let mut events = Vec::new();
        for (i, peak) in f.peaks.iter().enumerate().cycle().take(20_000) {
            let t = i as f64 + bytes.len() as f64 * 1e-3;
            let jitter = Vector3::new(t.sin(), (1.3 * t).cos(), (0.7 * t).sin()) * 0.012;
            let event = event_at(peak.q + jitter);
            bytes.extend_from_slice(&event.to_bytes(ByteOrder::Big));
            events.push(event);
        }
        bytes.extend_from_slice(&[1, 2, 3]);

        let (sequential, seq_stats) = projector.accumulate(events);
        let (parallel, par_stats) = projector
            .accumulate_bytes(&bytes, ByteOrder::Big, 777)
            .unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(seq_stats, par_stats);
        assert_eq!(par_stats.events, 20_000);
        assert!(par_stats.binned > 0);
        assert!(par_stats.rejected() > 0);
    }
}
