//! Memory-mapped file readers.
//!

use crate::Result;
use log::warn;
use memmap2::Mmap;
use rayon::prelude::*;
use scdpeaks_core::config::ByteOrder;
use scdpeaks_core::event::{decode_records, EventRecord, RECORD_SIZE};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-component range of the event scattering vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QRange {
    /// Smallest (Qx, Qy, Qz) seen.
    pub min: [f32; 3],
    /// Largest (Qx, Qy, Qz) seen.
    pub max: [f32; 3],
}

impl QRange {
    fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    fn include(mut self, event: &EventRecord) -> Self {
        for (axis, value) in [event.qx, event.qy, event.qz].into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(value);
            self.max[axis] = self.max[axis].max(value);
        }
        self
    }

    fn union(mut self, other: Self) -> Self {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
        self
    }
}

/// Overview of an event file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventFileSummary {
    /// File size in bytes.
    pub file_size: usize,
    /// Complete 12-byte records.
    pub records: usize,
    /// Bytes after the last complete record.
    pub trailing_bytes: usize,
    /// Records with a NaN or infinite component.
    pub non_finite: usize,
    /// Range over the finite records, `None` if there are none.
    pub q_range: Option<QRange>,
}

/// A binary event file with memory-mapped I/O.
///
/// The file is a bare sequence of 12-byte records (Qx, Qy, Qz as `f32`).
/// There is no header and no integrity check; a trailing partial record is
/// ignored with a warning.
pub struct EventFileReader {
    reader: MappedFileReader,
    order: ByteOrder,
}

impl EventFileReader {
    /// Opens an event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P, order: ByteOrder) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let trailing = reader.len() % RECORD_SIZE;
        if trailing != 0 {
            warn!(
                "{}: {} trailing bytes after the last complete record are ignored",
                reader.path().display(),
                trailing
            );
        }
        Ok(Self { reader, order })
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the number of complete records in the file.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.reader.len() / RECORD_SIZE
    }

    /// Bytes after the last complete record.
    #[must_use]
    pub fn trailing_bytes(&self) -> usize {
        self.reader.len() % RECORD_SIZE
    }

    /// Byte order of the records.
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// The complete records as raw bytes.
    #[must_use]
    pub fn record_bytes(&self) -> &[u8] {
        &self.reader.as_bytes()[..self.event_count() * RECORD_SIZE]
    }

    /// Iterates the records in file order.
    pub fn events(&self) -> impl Iterator<Item = EventRecord> + '_ {
        decode_records(self.record_bytes(), self.order)
    }

    /// Scans the file in parallel for record counts and Q ranges.
    #[must_use]
    pub fn summary(&self, chunk_records: usize) -> EventFileSummary {
        let order = self.order;
        let (range, non_finite) = self
            .record_bytes()
            .par_chunks(chunk_records.max(1) * RECORD_SIZE)
            .map(|chunk| {
                decode_records(chunk, order).fold((QRange::empty(), 0usize), |(range, bad), event| {
                    if event.is_finite() {
                        (range.include(&event), bad)
                    } else {
                        (range, bad + 1)
                    }
                })
            })
            .reduce(
                || (QRange::empty(), 0),
                |(a, bad_a), (b, bad_b)| (a.union(b), bad_a + bad_b),
            );

        let records = self.event_count();
        EventFileSummary {
            file_size: self.file_size(),
            records,
            trailing_bytes: self.trailing_bytes(),
            non_finite,
            q_range: (records > non_finite).then_some(range),
        }
    }
}
