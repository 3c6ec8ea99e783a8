//! Orientation-matrix files.
//!
//! Three lines with the UB rows, one lattice line
//! `a b c [alpha beta gamma [volume]]` and an optional line with the
//! uncertainties of the lattice constants. Anything after that is ignored.

use crate::{Error, Result};
use scdpeaks_core::{OrientationMatrix, UnitCell};
use std::fs;
use std::path::Path;

/// Contents of an orientation-matrix file.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationFile {
    pub orientation: OrientationMatrix,
    pub cell: UnitCell,
    /// Uncertainties of the lattice line, in its order.
    pub uncertainties: Vec<f64>,
}

impl OrientationFile {
    /// Reads a matrix file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parses matrix-file text.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] for missing or malformed lines and a core
    /// error for a singular matrix or a bad lattice.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.trim().is_empty());

        let mut next_numbers = |what: &str, min: usize| -> Result<Option<Vec<f64>>> {
            let Some((number, line)) = lines.next() else {
                return Ok(None);
            };
            let values = parse_floats(number, line)?;
            if values.len() < min {
                return Err(Error::parse(
                    number,
                    format!("{what} needs {min} values, found {}", values.len()),
                ));
            }
            Ok(Some(values))
        };

        let mut rows = [[0.0; 3]; 3];
        for row in &mut rows {
            let values = next_numbers("matrix row", 3)?
                .ok_or_else(|| Error::InvalidFormat("orientation matrix is incomplete".into()))?;
            row.copy_from_slice(&values[..3]);
        }
        let lattice = next_numbers("lattice line", 3)?
            .ok_or_else(|| Error::InvalidFormat("lattice constants are missing".into()))?;
        let uncertainties = next_numbers("uncertainty line", 0)?.unwrap_or_default();

        let mut cell = UnitCell::new(lattice[0], lattice[1], lattice[2])?;
        if let [alpha, beta, gamma, ..] = lattice[3..] {
            cell = cell.with_angles(alpha, beta, gamma);
        }
        if let Some(&volume) = lattice.get(6) {
            cell = cell.with_volume(volume);
        }

        Ok(Self {
            orientation: OrientationMatrix::from_rows(rows)?,
            cell,
            uncertainties,
        })
    }
}

fn parse_floats(number: usize, line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| Error::parse(number, format!("invalid number '{token}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MATRIX: &str = "\
  0.0145300  -0.1269100   0.0302600
 -0.0961000  -0.0247800  -0.0551900
  0.0903300   0.0052200  -0.0610800
     6.5590     7.0380     9.4950    90.000    90.000    90.000   438.307
     0.0010     0.0010     0.0010     0.000     0.000     0.000     0.061
";

    #[test]
    fn test_parse_matrix_file() {
        let file = OrientationFile::parse(MATRIX).unwrap();
        let ub = file.orientation.matrix();
        assert_relative_eq!(ub[(0, 1)], -0.12691);
        assert_relative_eq!(ub[(2, 0)], 0.09033);
        assert_relative_eq!(file.cell.a, 6.559);
        assert_relative_eq!(file.cell.c, 9.495);
        assert_relative_eq!(file.cell.gamma, 90.0);
        assert_eq!(file.cell.volume, Some(438.307));
        assert_eq!(file.uncertainties.len(), 7);
    }

    #[test]
    fn test_read_from_disk() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(MATRIX.as_bytes()).unwrap();
        tmp.flush().unwrap();
        let file = OrientationFile::read(tmp.path()).unwrap();
        assert_eq!(file, OrientationFile::parse(MATRIX).unwrap());
    }

    #[test]
    fn test_minimal_file() {
        let file = OrientationFile::parse("0.2 0 0\n0 0.2 0\n0 0 0.2\n5 5 5\n").unwrap();
        assert_relative_eq!(file.cell.alpha, 90.0);
        assert_eq!(file.cell.volume, None);
        assert!(file.uncertainties.is_empty());
        let q = file.orientation.q_vector(1, 2, 3);
        assert_relative_eq!(q.z, 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_malformed_files() {
        assert!(matches!(
            OrientationFile::parse("1 0 0\n0 1 0\n"),
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            OrientationFile::parse("1 0 0\n0 x 0\n0 0 1\n5 5 5\n"),
            Err(Error::Parse { line: 2, .. })
        ));
        assert!(matches!(
            OrientationFile::parse("1 0 0\n0 1 0\n0 0 1\n5 5\n"),
            Err(Error::Parse { line: 4, .. })
        ));
        assert!(matches!(
            OrientationFile::parse("1 0 0\n2 0 0\n0 0 1\n5 5 5\n"),
            Err(Error::CoreError(_))
        ));
    }
}
