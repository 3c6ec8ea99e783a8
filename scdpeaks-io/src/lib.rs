//! scdpeaks-io: File I/O for scdpeaks.
//!
//! This crate reads memory-mapped binary event files via memmap2 and
//! reads, writes and merges the text reflection files (predicted peaks,
//! profiles and integrated intensities).
//!

mod error;
pub mod merge;
pub mod orientation;
mod reader;
pub mod reflection;
mod writer;

pub use error::{Error, Result};
pub use merge::{merge_files, merge_texts, MergeSummary};
pub use orientation::OrientationFile;
pub use reader::{EventFileReader, EventFileSummary, MappedFileReader, QRange};
pub use reflection::{FileHeader, ReflectionFile, ReflectionRecord, RunInfo, RunSection};
pub use writer::{write_reflection_file, EventFileWriter, ReflectionWriter};
