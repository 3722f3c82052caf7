//! Loaders for plain-text spike data.
//!
//! Currently one format: spike cluster files, which hold one 1-based cluster
//! label per line, one line per spike.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("{}:{line}: {message}", path.display())]
    ParseError {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Load a spike cluster file.
///
/// Each non-blank line holds a single integer cluster label numbered from 1.
/// Labels are returned numbered from 0, the convention used inside KWIK
/// files.
///
/// # Arguments
///
/// * `path` - Path to the text file
///
/// # Returns
///
/// One zero-based label per spike, in file order.
///
/// # Errors
///
/// Returns an error if the file cannot be read, holds no labels, or contains
/// a line that is not a single positive integer.
pub fn load_spike_clusters<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(64 * 1024, file);

    let mut labels = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let parse_error = |message: String| LoaderError::ParseError {
            path: path.to_path_buf(),
            line: idx + 1,
            message,
        };

        let value: i64 = text
            .parse()
            .map_err(|_| parse_error(format!("expected an integer cluster label, found '{}'", text)))?;
        if value < 1 {
            return Err(parse_error(format!(
                "cluster labels start at 1, found {}",
                value
            )));
        }
        let label = u32::try_from(value - 1)
            .map_err(|_| parse_error(format!("cluster label {} is too large", value)))?;
        labels.push(label);
    }

    if labels.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(labels)
}
