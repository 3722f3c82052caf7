//! Writers for the legacy KlustaKwik text formats.
//!
//! - `.fet.N`: integer features, one spike per line, time in the last column
//! - `.fmask.N`: floating-point masks, one spike per line
//!
//! Both start with a header line holding the number of columns, and separate
//! values with single spaces.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use csv::WriterBuilder;
use ndarray::ArrayView2;
use thiserror::Error;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Mismatched array lengths.
    #[error("array length mismatch: features has {features_len} rows, times has {times_len} entries")]
    LengthMismatch { features_len: usize, times_len: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a space-delimited record writer for the given path.
///
/// Records are flexible because the header line has a single field.
fn create_record_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_writer(BufWriter::new(file)))
}

fn finish(mut writer: csv::Writer<BufWriter<File>>, path_str: String) -> Result<()> {
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    let mut inner = writer.into_inner().map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e.into_error(),
    })?;
    inner.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })
}

/// Write a KlustaKwik feature file.
///
/// The header holds the number of columns (features plus the time column);
/// each following line holds the features of one spike followed by its time
/// in samples.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `features` - Integer features, shape `(n_spikes, n_features)`
/// * `times` - Spike times in samples, one per row of `features`
///
/// # Errors
///
/// Returns an error if `features` and `times` disagree in length, or if the
/// file cannot be created or written.
pub fn write_fet(path: &Path, features: ArrayView2<'_, i16>, times: &[u64]) -> Result<()> {
    if features.nrows() != times.len() {
        return Err(WriteError::LengthMismatch {
            features_len: features.nrows(),
            times_len: times.len(),
        });
    }

    ensure_parent_dirs(path)?;
    let mut writer = create_record_writer(path)?;
    let path_str = path.display().to_string();
    let csv_error = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    writer
        .write_record([(features.ncols() + 1).to_string()])
        .map_err(csv_error)?;

    let mut record: Vec<String> = Vec::with_capacity(features.ncols() + 1);
    for (row, &time) in features.rows().into_iter().zip(times) {
        record.clear();
        record.extend(row.iter().map(|v| v.to_string()));
        record.push(time.to_string());
        writer.write_record(&record).map_err(csv_error)?;
    }

    finish(writer, path_str)
}

/// Write a KlustaKwik mask file.
///
/// The header holds the number of columns (masks plus a time column); each
/// following line holds the masks of one spike with `precision` decimals and
/// a trailing zero for the time column.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `masks` - Mask values, shape `(n_spikes, n_features)`
/// * `precision` - Number of decimals written per value
pub fn write_fmask(path: &Path, masks: ArrayView2<'_, f32>, precision: usize) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_record_writer(path)?;
    let path_str = path.display().to_string();
    let csv_error = |e| WriteError::CsvError {
        path: path_str.clone(),
        source: e,
    };

    writer
        .write_record([(masks.ncols() + 1).to_string()])
        .map_err(csv_error)?;

    let zero = format!("{:.*}", precision, 0.0f32);
    let mut record: Vec<String> = Vec::with_capacity(masks.ncols() + 1);
    for row in masks.rows() {
        record.clear();
        record.extend(row.iter().map(|v| format!("{:.*}", precision, v)));
        record.push(zero.clone());
        writer.write_record(&record).map_err(csv_error)?;
    }

    finish(writer, path_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_fet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.fet.0");
        let features = array![[1i16, -2, 3], [4, 5, -6]];

        write_fet(&path, features.view(), &[100, 250]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["4", "1 -2 3 100", "4 5 -6 250"]);
    }

    #[test]
    fn test_write_fet_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.fet.0");
        let features = array![[1i16, 2]];

        match write_fet(&path, features.view(), &[1, 2]) {
            Err(WriteError::LengthMismatch {
                features_len,
                times_len,
            }) => {
                assert_eq!(features_len, 1);
                assert_eq!(times_len, 2);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_write_fmask() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.fmask.0");
        let masks = array![[0.5f32, 1.0], [0.0, 0.25]];

        write_fmask(&path, masks.view(), 6).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "3",
                "0.500000 1.000000 0.000000",
                "0.000000 0.250000 0.000000"
            ]
        );
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out").join("exp.fet.1");
        let features = array![[7i16]];

        write_fet(&path, features.view(), &[9]).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_write_fet_no_spikes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exp.fet.2");
        let features = ndarray::Array2::<i16>::zeros((0, 3));

        write_fet(&path, features.view(), &[]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().collect::<Vec<_>>(), vec!["4"]);
    }
}
