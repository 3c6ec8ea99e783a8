//! Merging per-run reflection files.
//!
//! Works on lines rather than parsed records so that every value is carried
//! over exactly as written. The first file contributes its header block;
//! later files contribute everything from their first run record (type 0)
//! on. Terminating records are dropped and a single one is appended.

use crate::reflection::ReflectionRecord;
use crate::Result;
use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::Path;

/// What a merge produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Input files.
    pub files: usize,
    /// Reflection records in the output.
    pub records: usize,
}

/// True for a type-3 line whose fields are all zero.
fn is_sentinel_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("3") {
        return false;
    }
    let mut fields = 0;
    for token in tokens {
        match token.parse::<f64>() {
            Ok(value) if value.abs() < f64::MIN_POSITIVE => fields += 1,
            _ => return false,
        }
    }
    fields > 0
}

fn is_record_line(line: &str) -> bool {
    line.split_whitespace().next() == Some("3") && !is_sentinel_line(line)
}

/// Merges the text of several reflection files.
#[must_use]
pub fn merge_texts<S: AsRef<str>>(texts: &[S]) -> (String, MergeSummary) {
    let mut merged = String::new();
    let mut summary = MergeSummary {
        files: texts.len(),
        records: 0,
    };

    for (i, text) in texts.iter().enumerate() {
        let mut lines = text.as_ref().lines().peekable();
        if i > 0 {
            while lines
                .next_if(|line| line.split_whitespace().next() != Some("0"))
                .is_some()
            {}
            if lines.peek().is_none() {
                warn!("Reflection file {} has no run records", i + 1);
            }
        }
        for line in lines {
            if line.trim().is_empty() || is_sentinel_line(line) {
                continue;
            }
            if is_record_line(line) {
                summary.records += 1;
            }
            merged.push_str(line);
            merged.push('\n');
        }
    }

    merged.push_str(&ReflectionRecord::sentinel().to_string());
    merged.push('\n');
    (merged, summary)
}

/// Merges reflection files into `output`.
///
/// # Errors
/// Returns an error if an input cannot be read or the output cannot be
/// written.
pub fn merge_files<P, Q>(inputs: &[P], output: Q) -> Result<MergeSummary>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let texts = inputs
        .iter()
        .map(fs::read_to_string)
        .collect::<std::io::Result<Vec<_>>>()?;
    let (merged, summary) = merge_texts(&texts);

    let mut file = fs::File::create(output.as_ref())?;
    file.write_all(merged.as_bytes())?;
    file.flush()?;
    info!(
        "Merged {} files with {} reflections into {}",
        summary.files,
        summary.records,
        output.as_ref().display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "3      0    0    0    0    0.00    0.00    0.00    0.000  0.00000  0.00000  0.000000   0.0000     0      0.00   0.00    0";

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel_line(SENTINEL));
        assert!(is_sentinel_line(&ReflectionRecord::sentinel().to_string()));
        assert!(!is_sentinel_line("3 1 0 0 0"));
        assert!(!is_sentinel_line("3"));
        assert!(!is_sentinel_line("0 NRUN DETNUM"));
        assert!(is_record_line("3 1 -1 1 0"));
    }

    #[test]
    fn test_merge_texts() {
        let first = format!("Version: 2.0\n6 L1\n7 1800.0 0.0\n0 NRUN\n1 1 17\n2 SEQN\n3 1 1 0 0\n3 2 0 1 0\n{SENTINEL}\n");
        let second = format!("Version: 2.0\n6 L1\n7 1800.0 0.0\n0 NRUN\n1 2 17\n2 SEQN\n3 1 0 0 1\n{SENTINEL}\n");
        let (merged, summary) = merge_texts(&[first, second]);

        assert_eq!(summary, MergeSummary { files: 2, records: 3 });
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.iter().filter(|l| l.starts_with("Version")).count(), 1);
        assert_eq!(lines.iter().filter(|l| is_sentinel_line(l)).count(), 1);
        assert!(is_sentinel_line(lines.last().unwrap()));
        assert_eq!(
            lines[..lines.len() - 1],
            [
                "Version: 2.0",
                "6 L1",
                "7 1800.0 0.0",
                "0 NRUN",
                "1 1 17",
                "2 SEQN",
                "3 1 1 0 0",
                "3 2 0 1 0",
                "0 NRUN",
                "1 2 17",
                "2 SEQN",
                "3 1 0 0 1",
            ]
        );
    }

    #[test]
    fn test_merge_file_without_runs() {
        let (merged, summary) = merge_texts(&["0 NRUN\n1 1 17\n3 1 1 0 0\n", "Version: 2.0\n"]);
        assert_eq!(summary.records, 1);
        assert_eq!(merged.lines().count(), 4);
    }
}
