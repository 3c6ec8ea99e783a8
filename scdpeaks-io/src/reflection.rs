//! Reflection files.
//!
//! The same line-oriented text format carries predicted peaks, their
//! profiles and their integrated intensities. Every line starts with a
//! record type:
//!
//! | type | content |
//! |------|---------|
//! | `Version:` | format version, facility and instrument |
//! | 6, 7 | title and values for L1 (cm) and the T0 shift (μs) |
//! | 4, 5 | title and one line per detector (cm, NeXus axis order) |
//! | 0, 1 | title and values for a run on one detector |
//! | 2, 3 | title and one line per reflection |
//! | 8 | up to ten profile counts of the preceding reflection |
//!
//! A type-3 line with every field zero terminates the file.

use crate::{Error, Result};
use log::warn;
use scdpeaks_algorithms::{fit_profiles, IntegrationSummary, PeakShapeFitter};
use scdpeaks_core::config::{InstrumentConfig, ReductionConfig};
use scdpeaks_core::{CandidatePeak, DetectorPlane, Hkl, Profile};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

/// Title line of the L1 / T0 record.
pub const L1_T0_TITLES: &str = "6         L1    T0_SHIFT";
/// Title line of the detector table.
pub const DETECTOR_TITLES: &str = "4 DETNUM  NROWS  NCOLS   WIDTH   HEIGHT   DEPTH   DETD   CenterX   CenterY   CenterZ    BaseX    BaseY    BaseZ      UpX      UpY      UpZ";
/// Title line of a run record.
pub const RUN_TITLES: &str = "0 NRUN DETNUM    CHI    PHI  OMEGA MONCNT";
/// Title line of the reflection table.
pub const REFLECTION_TITLES: &str = "2   SEQN    H    K    L     COL     ROW    CHAN       L2  2_THETA       AZ        WL        D   IPK      INTI   SIGI RFLG";

/// Profile counts per type-8 line.
pub const COUNTS_PER_LINE: usize = 10;

const FORMAT_VERSION: &str = "2.0";
const CM_PER_M: f64 = 100.0;

/// Instrument block at the top of a reflection file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub version: String,
    pub facility: String,
    pub instrument: String,
    /// Moderator-to-sample distance (m).
    pub l1: f64,
    /// Time-of-flight offset (μs).
    pub t0_shift: f64,
    pub detectors: Vec<DetectorPlane>,
}

impl FileHeader {
    /// Header describing `instrument`.
    #[must_use]
    pub fn from_instrument(instrument: &InstrumentConfig) -> Self {
        let mut detectors = instrument.detectors.clone();
        detectors.sort_by_key(|d| d.id);
        Self {
            version: FORMAT_VERSION.to_string(),
            facility: instrument.facility.clone(),
            instrument: instrument.name.clone(),
            l1: instrument.l1,
            t0_shift: instrument.t0_shift,
            detectors,
        }
    }

    /// The header as written, one string per line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Version: {}  Facility: {}  Instrument: {}",
                self.version, self.facility, self.instrument
            ),
            L1_T0_TITLES.to_string(),
            format!("7 {:10.4}  {:10.3}", self.l1 * CM_PER_M, self.t0_shift),
            DETECTOR_TITLES.to_string(),
        ];
        lines.extend(self.detectors.iter().map(detector_line));
        lines
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::from_instrument(&InstrumentConfig::default())
    }
}

/// Detector line in centimeters, axes reordered to (y, z, x).
fn detector_line(d: &DetectorPlane) -> String {
    let [cx, cy, cz] = d.center.map(|v| v * CM_PER_M);
    let [bx, by, bz] = d.base;
    let [ux, uy, uz] = d.up;
    format!(
        "5 {:6} {:6} {:6} {:7.4} {:7.4} {:7.4} {:6.2} {:9.4} {:9.4} {:9.4} {:8.5} {:8.5} {:8.5} {:8.5} {:8.5} {:8.5}",
        d.id,
        d.rows,
        d.cols,
        d.width * CM_PER_M,
        d.height * CM_PER_M,
        d.depth * CM_PER_M,
        d.distance() * CM_PER_M,
        cy,
        cz,
        cx,
        by,
        bz,
        bx,
        uy,
        uz,
        ux
    )
}

/// One run on one detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunInfo {
    pub run: u32,
    pub detector_id: u32,
    /// Goniometer angles (degrees).
    pub chi: f64,
    pub phi: f64,
    pub omega: f64,
    pub monitor_count: f64,
}

impl fmt::Display for RunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "1 {:4} {:6} {:6.2} {:6.2} {:6.2} {:6.0}",
            self.run, self.detector_id, self.chi, self.phi, self.omega, self.monitor_count
        )
    }
}

/// One reflection line, in file units.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionRecord {
    pub seqn: u32,
    pub hkl: Hkl,
    pub col: f64,
    pub row: f64,
    /// Time-of-flight channel.
    pub chan: f64,
    /// Sample-to-pixel distance (cm).
    pub l2: f64,
    /// Radians.
    pub two_theta: f64,
    /// Radians.
    pub azimuth: f64,
    pub wavelength: f64,
    pub d_spacing: f64,
    /// Largest profile count.
    pub ipk: u32,
    pub intensity: f64,
    pub sigma: f64,
    pub reflection_flag: i32,
    /// Profile counts, written as type-8 lines.
    pub profile: Option<Profile>,
}

impl ReflectionRecord {
    /// Record for a predicted peak, with its profile if one was measured.
    #[must_use]
    pub fn from_peak(peak: &CandidatePeak, tof_channel_width: f64, profile: Option<Profile>) -> Self {
        Self {
            seqn: peak.seqn,
            hkl: peak.hkl,
            col: peak.col,
            row: peak.row,
            chan: peak.tof / tof_channel_width,
            l2: peak.l2 * CM_PER_M,
            two_theta: peak.two_theta,
            azimuth: peak.azimuth,
            wavelength: peak.wavelength,
            d_spacing: peak.d_spacing,
            ipk: profile.as_ref().map_or(0, Profile::max),
            intensity: peak.intensity,
            sigma: peak.sigma,
            reflection_flag: peak.reflection_flag,
            profile,
        }
    }

    /// The all-zero terminating record.
    #[must_use]
    pub fn sentinel() -> Self {
        Self {
            seqn: 0,
            hkl: Hkl::new(0, 0, 0),
            col: 0.0,
            row: 0.0,
            chan: 0.0,
            l2: 0.0,
            two_theta: 0.0,
            azimuth: 0.0,
            wavelength: 0.0,
            d_spacing: 0.0,
            ipk: 0,
            intensity: 0.0,
            sigma: 0.0,
            reflection_flag: 0,
            profile: None,
        }
    }

    /// True for the terminating record.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.seqn == 0 && self.hkl.is_origin() && self.ipk == 0 && self.reflection_flag == 0
    }

    /// Type-8 lines of the profile, empty without one.
    #[must_use]
    pub fn profile_lines(&self) -> Vec<String> {
        self.profile
            .as_ref()
            .map(|profile| {
                profile
                    .counts()
                    .chunks(COUNTS_PER_LINE)
                    .map(|chunk| {
                        let mut line = String::from("8");
                        for count in chunk {
                            line.push_str(&format!(" {count:6}"));
                        }
                        line
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for ReflectionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "3 {:6} {:4} {:4} {:4} {:7.2} {:7.2} {:7.2} {:8.3} {:8.5} {:8.5} {:9.6} {:8.4} {:5} {:9.2} {:6.2} {:4}",
            self.seqn,
            self.hkl.h,
            self.hkl.k,
            self.hkl.l,
            self.col,
            self.row,
            self.chan,
            self.l2,
            self.two_theta,
            self.azimuth,
            self.wavelength,
            self.d_spacing,
            self.ipk,
            self.intensity,
            self.sigma,
            self.reflection_flag
        )
    }
}

/// Reflections of one run on one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSection {
    pub info: RunInfo,
    pub records: Vec<ReflectionRecord>,
}

/// A parsed reflection file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReflectionFile {
    pub header: FileHeader,
    pub sections: Vec<RunSection>,
}

impl ReflectionFile {
    /// Builds a file from predicted peaks, one section per detector in
    /// ascending id. Within a section peaks keep their prediction order.
    ///
    /// `profiles`, when given, are paired with `peaks` by position.
    #[must_use]
    pub fn from_peaks(
        config: &ReductionConfig,
        peaks: &[CandidatePeak],
        profiles: Option<&[Profile]>,
    ) -> Self {
        let mut order: Vec<usize> = (0..peaks.len()).collect();
        order.sort_by_key(|&i| peaks[i].detector_id);

        let run = &config.run;
        let mut sections: Vec<RunSection> = Vec::new();
        for i in order {
            let peak = &peaks[i];
            let profile = profiles.and_then(|p| p.get(i)).cloned();
            let record =
                ReflectionRecord::from_peak(peak, config.prediction.tof_channel_width, profile);
            match sections.last_mut() {
                Some(section) if section.info.detector_id == peak.detector_id => {
                    section.records.push(record);
                }
                _ => sections.push(RunSection {
                    info: RunInfo {
                        run: run.run_number,
                        detector_id: peak.detector_id,
                        chi: run.chi,
                        phi: run.phi,
                        omega: run.omega,
                        monitor_count: run.monitor_count,
                    },
                    records: vec![record],
                }),
            }
        }

        Self {
            header: FileHeader::from_instrument(&config.instrument),
            sections,
        }
    }

    /// Reads and parses a reflection file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parses reflection-file text. Missing header lines keep their
    /// defaults; anything after the terminating record is ignored.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for malformed lines, reflections outside a
    /// run, profile counts without a reflection and unknown record types.
    pub fn parse(text: &str) -> Result<Self> {
        let mut file = Self::default();

        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            let mut fields = Fields::new(number, line);
            let Some(kind) = fields.tokens.next() else {
                continue;
            };
            match kind {
                "Version:" => file.header.parse_version(&mut fields),
                "4" | "6" | "0" | "2" => {}
                "7" => {
                    file.header.l1 = fields.next::<f64>("L1")? / CM_PER_M;
                    file.header.t0_shift = fields.next("T0_SHIFT")?;
                }
                "5" => file.header.detectors.push(parse_detector(&mut fields)?),
                "1" => file.sections.push(RunSection {
                    info: parse_run(&mut fields)?,
                    records: Vec::new(),
                }),
                "3" => {
                    let record = parse_record(&mut fields)?;
                    if record.is_sentinel() {
                        break;
                    }
                    let section = file.sections.last_mut().ok_or_else(|| {
                        Error::parse(number, "reflection before the first run record")
                    })?;
                    section.records.push(record);
                }
                "8" => {
                    let record = file
                        .sections
                        .last_mut()
                        .and_then(|s| s.records.last_mut())
                        .ok_or_else(|| Error::parse(number, "profile counts without a reflection"))?;
                    let mut counts = record
                        .profile
                        .take()
                        .map(|p| p.counts().to_vec())
                        .unwrap_or_default();
                    let tokens: Vec<&str> = fields.tokens.by_ref().collect();
                    for token in tokens {
                        counts.push(fields.value(token, "count")?);
                    }
                    record.profile = Some(Profile::from_counts(counts));
                }
                other => {
                    return Err(Error::parse(number, format!("unknown record type '{other}'")));
                }
            }
        }
        Ok(file)
    }

    /// Reflections across all sections.
    pub fn records(&self) -> impl Iterator<Item = &ReflectionRecord> {
        self.sections.iter().flat_map(|s| s.records.iter())
    }

    /// Number of reflections.
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.sections.iter().map(|s| s.records.len()).sum()
    }

    /// Fits every profile and returns the integrate file.
    ///
    /// The header and run records carry over. Accepted reflections get
    /// their fitted intensity, sigma and flag; rejected ones are kept only
    /// when the fitter's configuration asks for it, flagged with the
    /// rejection code. Profiles are dropped. Reflections without a profile
    /// are skipped with a warning.
    ///
    /// # Errors
    /// Returns a core error if a profile's length differs from the
    /// fitter's.
    pub fn integrate(
        &self,
        fitter: &PeakShapeFitter,
        parallel: bool,
    ) -> Result<(Self, IntegrationSummary)> {
        let mut positions = Vec::new();
        let mut hkls = Vec::new();
        let mut profiles = Vec::new();
        for (s, section) in self.sections.iter().enumerate() {
            for (r, record) in section.records.iter().enumerate() {
                match &record.profile {
                    Some(profile) if profile.len() != fitter.num_steps() => {
                        return Err(scdpeaks_core::Error::ProfileLength {
                            expected: fitter.num_steps(),
                            actual: profile.len(),
                        }
                        .into());
                    }
                    Some(profile) => {
                        positions.push((s, r));
                        hkls.push(record.hkl);
                        profiles.push(profile.clone());
                    }
                    None => warn!("Reflection {} {} has no profile, skipped", record.seqn, record.hkl),
                }
            }
        }

        let integration = fit_profiles(fitter, &hkls, &profiles, parallel);
        let write_rejected = fitter.config().write_rejected;

        let mut sections: Vec<RunSection> = self
            .sections
            .iter()
            .map(|s| RunSection {
                info: s.info,
                records: Vec::new(),
            })
            .collect();
        for (&(s, r), fit) in positions.iter().zip(&integration.fits) {
            if let Some((intensity, sigma, flag)) = fit.output(write_rejected) {
                let source = &self.sections[s].records[r];
                sections[s].records.push(ReflectionRecord {
                    intensity,
                    sigma,
                    reflection_flag: flag,
                    profile: None,
                    ..source.clone()
                });
            }
        }

        Ok((
            Self {
                header: self.header.clone(),
                sections,
            },
            integration.summary,
        ))
    }
}

impl FileHeader {
    fn parse_version(&mut self, fields: &mut Fields<'_>) {
        // The record type itself was the first label.
        let mut label = Some("Version:");
        for token in fields.tokens.by_ref() {
            match (label, token) {
                (_, "Version:" | "Facility:" | "Instrument:") => label = Some(token),
                (Some("Version:"), value) => self.version = value.to_string(),
                (Some("Facility:"), value) => self.facility = value.to_string(),
                (Some("Instrument:"), value) => self.instrument = value.to_string(),
                _ => {}
            }
        }
    }
}

/// Whitespace-separated fields of one line.
struct Fields<'a> {
    line: usize,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(line: usize, text: &'a str) -> Self {
        Self {
            line,
            tokens: text.split_whitespace(),
        }
    }

    fn next<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let token = self
            .tokens
            .next()
            .ok_or_else(|| Error::parse(self.line, format!("missing {name}")))?;
        self.value(token, name)
    }

    fn value<T: FromStr>(&self, token: &str, name: &str) -> Result<T> {
        token
            .parse()
            .map_err(|_| Error::parse(self.line, format!("invalid {name} '{token}'")))
    }
}

fn parse_detector(fields: &mut Fields<'_>) -> Result<DetectorPlane> {
    let id = fields.next("DETNUM")?;
    let rows = fields.next("NROWS")?;
    let cols = fields.next("NCOLS")?;
    let width: f64 = fields.next("WIDTH")?;
    let height: f64 = fields.next("HEIGHT")?;
    let depth: f64 = fields.next("DEPTH")?;
    let _distance: f64 = fields.next("DETD")?;
    let mut vector = |name: &str| -> Result<[f64; 3]> {
        let y: f64 = fields.next(name)?;
        let z: f64 = fields.next(name)?;
        let x: f64 = fields.next(name)?;
        Ok([x, y, z])
    };
    let center = vector("center")?.map(|v| v / CM_PER_M);
    let base = vector("base")?;
    let up = vector("up")?;
    Ok(DetectorPlane {
        id,
        rows,
        cols,
        width: width / CM_PER_M,
        height: height / CM_PER_M,
        depth: depth / CM_PER_M,
        center,
        base,
        up,
    })
}

fn parse_run(fields: &mut Fields<'_>) -> Result<RunInfo> {
    Ok(RunInfo {
        run: fields.next("NRUN")?,
        detector_id: fields.next("DETNUM")?,
        chi: fields.next("CHI")?,
        phi: fields.next("PHI")?,
        omega: fields.next("OMEGA")?,
        monitor_count: fields.next("MONCNT")?,
    })
}

fn parse_record(fields: &mut Fields<'_>) -> Result<ReflectionRecord> {
    let seqn = fields.next("SEQN")?;
    let hkl = Hkl::new(fields.next("H")?, fields.next("K")?, fields.next("L")?);
    Ok(ReflectionRecord {
        seqn,
        hkl,
        col: fields.next("COL")?,
        row: fields.next("ROW")?,
        chan: fields.next("CHAN")?,
        l2: fields.next("L2")?,
        two_theta: fields.next("2_THETA")?,
        azimuth: fields.next("AZ")?,
        wavelength: fields.next("WL")?,
        d_spacing: fields.next("D")?,
        ipk: fields.next("IPK")?,
        intensity: fields.next("INTI")?,
        sigma: fields.next("SIGI")?,
        reflection_flag: fields.next("RFLG")?,
        profile: None,
    })
}
