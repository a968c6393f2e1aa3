//! Comma-separated matrix files.
//!
//! One matrix row per line, columns separated by commas, no header. Used for
//! reference trajectories and for exported simulation data.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;
use tracing::debug;

use crate::error::{Error, Result};

/// Loads a `rows × cols` matrix.
///
/// # Errors
///
/// [`Error::Io`] if the file cannot be read, [`Error::Parse`] if the file
/// does not hold exactly `rows` lines of `cols` numbers.
pub fn load_matrix(path: impl AsRef<Path>, rows: usize, cols: usize) -> Result<DMatrix<f64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = BufReader::new(file);

    let mut matrix = DMatrix::zeros(rows, cols);
    let mut row = 0;
    for line in reader.lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        if row == rows {
            return Err(Error::Parse(format!(
                "{}: more than {rows} rows",
                path.display()
            )));
        }

        let mut col = 0;
        for field in line.split(',') {
            if col == cols {
                return Err(Error::Parse(format!(
                    "{}: row {row} has more than {cols} columns",
                    path.display()
                )));
            }
            matrix[(row, col)] = field.trim().parse().map_err(|_| {
                Error::Parse(format!(
                    "{}: row {row}, column {col}: invalid number {:?}",
                    path.display(),
                    field.trim()
                ))
            })?;
            col += 1;
        }
        if col != cols {
            return Err(Error::Parse(format!(
                "{}: row {row} has {col} columns, expected {cols}",
                path.display()
            )));
        }
        row += 1;
    }

    if row != rows {
        return Err(Error::Parse(format!(
            "{}: found {row} rows, expected {rows}",
            path.display()
        )));
    }

    debug!(path = %path.display(), rows, cols, "matrix loaded");
    Ok(matrix)
}

/// Writes `matrix` row by row, each row terminated by a newline.
pub fn save_matrix(path: impl AsRef<Path>, matrix: &DMatrix<f64>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);

    for row in matrix.row_iter() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{line}").map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;

    debug!(path = %path.display(), rows = matrix.nrows(), cols = matrix.ncols(), "matrix saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ref.csv");
        let matrix = DMatrix::from_row_slice(2, 3, &[1.0, -2.5, 3.0, 0.125, 1e-3, -50.0]);

        save_matrix(&path, &matrix).unwrap();
        let loaded = load_matrix(&path, 2, 3).unwrap();
        assert_eq!(loaded, matrix);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1,-2.5,3\n0.125,0.001,-50\n");
    }

    #[test]
    fn test_load_rejects_shape_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "1,2,3\n4,5\n").unwrap();

        let err = load_matrix(&path, 2, 3).unwrap_err();
        assert!(err.to_string().contains("row 1"));

        assert!(matches!(load_matrix(&path, 1, 3), Err(Error::Parse(_))));
        assert!(matches!(load_matrix(&path, 3, 3), Err(Error::Parse(_))));
        assert!(matches!(load_matrix(&path, 2, 2), Err(Error::Parse(_))));
    }

    #[test]
    fn test_load_reports_bad_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nan.csv");
        fs::write(&path, "1,x\n").unwrap();

        let err = load_matrix(&path, 1, 2).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("row 0") && message.contains("column 1"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_matrix(dir.path().join("missing.csv"), 1, 1),
            Err(Error::Io { .. })
        ));
    }
}
