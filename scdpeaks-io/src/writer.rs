//! File writers for reflection and event files.

use crate::reflection::{
    FileHeader, ReflectionFile, ReflectionRecord, RunInfo, REFLECTION_TITLES, RUN_TITLES,
};
use crate::Result;
use scdpeaks_core::config::ByteOrder;
use scdpeaks_core::EventRecord;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writer for reflection files.
///
/// Call [`write_header`](Self::write_header) once, then
/// [`write_run`](Self::write_run) before each group of records, and
/// [`finish`](Self::finish) to append the terminating record.
pub struct ReflectionWriter<W: Write> {
    writer: W,
    records: usize,
}

impl ReflectionWriter<BufWriter<File>> {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReflectionWriter<W> {
    /// Wraps any writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Writes the instrument block.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        for line in header.lines() {
            writeln!(self.writer, "{line}")?;
        }
        Ok(())
    }

    /// Starts a run section.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_run(&mut self, info: &RunInfo) -> Result<()> {
        writeln!(self.writer, "{RUN_TITLES}")?;
        writeln!(self.writer, "{info}")?;
        writeln!(self.writer, "{REFLECTION_TITLES}")?;
        Ok(())
    }

    /// Writes one reflection and its profile lines, if it has a profile.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_record(&mut self, record: &ReflectionRecord) -> Result<()> {
        writeln!(self.writer, "{record}")?;
        for line in record.profile_lines() {
            writeln!(self.writer, "{line}")?;
        }
        self.records += 1;
        Ok(())
    }

    /// Writes every section of `file`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_sections(&mut self, file: &ReflectionFile) -> Result<()> {
        for section in &file.sections {
            self.write_run(&section.info)?;
            for record in &section.records {
                self.write_record(record)?;
            }
        }
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Appends the terminating record and flushes.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn finish(mut self) -> Result<W> {
        writeln!(self.writer, "{}", ReflectionRecord::sentinel())?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Writes `file` to `path`, returning the number of reflections written.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_reflection_file<P: AsRef<Path>>(path: P, file: &ReflectionFile) -> Result<usize> {
    let mut writer = ReflectionWriter::create(path)?;
    writer.write_header(&file.header)?;
    writer.write_sections(file)?;
    let written = writer.records_written();
    writer.finish()?;
    Ok(written)
}

/// Writer for binary event files.
pub struct EventFileWriter {
    writer: BufWriter<File>,
    order: ByteOrder,
}

impl EventFileWriter {
    /// Creates a new event file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, order: ByteOrder) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            order,
        })
    }

    /// Appends events.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_events(&mut self, events: &[EventRecord]) -> Result<()> {
        for event in events {
            self.writer.write_all(&event.to_bytes(self.order))?;
        }
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::RunSection;
    use crate::EventFileReader;
    use scdpeaks_core::{Hkl, Profile};
    use tempfile::NamedTempFile;

    fn sample_file() -> ReflectionFile {
        let record = ReflectionRecord {
            seqn: 1,
            hkl: Hkl::new(-1, 1, 0),
            col: 128.5,
            row: 128.5,
            chan: 465.16,
            l2: 40.0,
            two_theta: 1.5708,
            azimuth: 0.0,
            wavelength: 2.0,
            d_spacing: 1.4142,
            ipk: 12,
            intensity: 0.0,
            sigma: 0.0,
            reflection_flag: 0,
            profile: Some(Profile::from_counts((0..13).collect())),
        };
        ReflectionFile {
            header: FileHeader::default(),
            sections: vec![RunSection {
                info: RunInfo {
                    run: 7,
                    detector_id: 17,
                    chi: 0.0,
                    phi: 0.0,
                    omega: 0.0,
                    monitor_count: 0.0,
                },
                records: vec![record],
            }],
        }
    }

    #[test]
    fn test_write_reflection_file() {
        let file = NamedTempFile::new().unwrap();
        let written = write_reflection_file(file.path(), &sample_file()).unwrap();
        assert_eq!(written, 1);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Version: 2.0  Facility: SNS  Instrument: TOPAZ");
        assert!(lines.contains(&RUN_TITLES));
        assert!(lines.contains(&"1    7     17   0.00   0.00   0.00      0"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("8 ")).count(), 2);
        assert_eq!(lines.last(), Some(&ReflectionRecord::sentinel().to_string().as_str()));

        assert_eq!(ReflectionFile::read(file.path()).unwrap(), sample_file());
    }

    #[test]
    fn test_writer_into_memory() {
        let mut writer = ReflectionWriter::new(Vec::new());
        writer.write_sections(&sample_file()).unwrap();
        let bytes = writer.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(RUN_TITLES));
        assert_eq!(text.lines().count(), 7);
    }

    #[test]
    fn test_write_events() {
        let file = NamedTempFile::new().unwrap();
        let events = [
            EventRecord::new(-1.0, 2.0, 3.0),
            EventRecord::new(-4.0, 5.0, 6.0),
        ];
        let mut writer = EventFileWriter::create(file.path(), ByteOrder::Big).unwrap();
        writer.write_events(&events).unwrap();
        writer.flush().unwrap();

        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(data.len(), 24);
        let reader = EventFileReader::open(file.path(), ByteOrder::Big).unwrap();
        assert_eq!(reader.events().collect::<Vec<_>>(), events);
    }
}
