//! Narrow interface to a hierarchical dataset container.
//!
//! Paths are slash-separated (`/channel_groups/0/spikes/time_samples`); a
//! leading slash is optional. Groups are implied by the datasets beneath them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use thiserror::Error;

use super::dataset::Dataset;

/// Errors raised by container backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The container file could not be opened.
    #[error("failed to open '{}': {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// No dataset or group exists at the path.
    #[error("{container}: no such dataset or group '{path}'")]
    NotFound { container: String, path: String },

    /// The destination of a rename already exists.
    #[error("{container}: '{path}' already exists")]
    AlreadyExists { container: String, path: String },

    /// The dataset element type cannot be represented.
    #[error("{container}: dataset '{path}' has unsupported element type {dtype}")]
    UnsupportedType {
        container: String,
        path: String,
        dtype: String,
    },

    /// Any other failure reported by the storage backend.
    #[error("{container}: failed to {operation} '{path}': {reason}")]
    Backend {
        container: String,
        operation: &'static str,
        path: String,
        reason: String,
    },
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A hierarchical store of named numeric datasets.
pub trait Container {
    /// Human-readable name of the container, usually its file path.
    fn label(&self) -> &str;

    /// Returns true if a dataset or group exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Names of the direct children of `group`, sorted.
    fn members(&self, group: &str) -> Result<Vec<String>>;

    /// Shape of a dataset, without reading its data.
    fn shape(&self, path: &str) -> Result<Vec<usize>>;

    /// Read a whole dataset into memory.
    fn read(&self, path: &str) -> Result<Dataset>;

    /// Create the dataset at `path`, replacing any existing one.
    fn write(&mut self, path: &str, data: &Dataset) -> Result<()>;

    /// Delete the dataset or group at `path`.
    fn remove(&mut self, path: &str) -> Result<()>;

    /// Move the dataset at `from` to `to`, which must not exist.
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
}

impl<C: Container + ?Sized> Container for Box<C> {
    fn label(&self) -> &str {
        (**self).label()
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }

    fn members(&self, group: &str) -> Result<Vec<String>> {
        (**self).members(group)
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>> {
        (**self).shape(path)
    }

    fn read(&self, path: &str) -> Result<Dataset> {
        (**self).read(path)
    }

    fn write(&mut self, path: &str, data: &Dataset) -> Result<()> {
        (**self).write(path, data)
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        (**self).remove(path)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to)
    }
}

/// Strip leading and trailing slashes so that `/a/b/` and `a/b` compare equal.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Container held entirely in memory.
///
/// Used for tests and for staging data that has not been persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainer {
    label: String,
    datasets: BTreeMap<String, Dataset>,
}

impl MemoryContainer {
    /// Creates an empty container with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            datasets: BTreeMap::new(),
        }
    }

    /// Builder-style insert, convenient for fixtures.
    pub fn with_dataset(mut self, path: &str, data: impl Into<Dataset>) -> Self {
        self.datasets
            .insert(normalize_path(path).to_string(), data.into());
        self
    }

    /// Paths of all datasets, sorted.
    pub fn dataset_paths(&self) -> Vec<String> {
        self.datasets.keys().map(|k| format!("/{}", k)).collect()
    }

    fn not_found(&self, path: &str) -> StoreError {
        StoreError::NotFound {
            container: self.label.clone(),
            path: path.to_string(),
        }
    }

    fn children_prefix(path: &str) -> String {
        if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        }
    }
}

impl Container for MemoryContainer {
    fn label(&self) -> &str {
        &self.label
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if self.datasets.contains_key(path) {
            return true;
        }
        let prefix = Self::children_prefix(path);
        self.datasets.keys().any(|k| k.starts_with(&prefix))
    }

    fn members(&self, group: &str) -> Result<Vec<String>> {
        let group = normalize_path(group);
        let prefix = Self::children_prefix(group);

        let names: BTreeSet<String> = self
            .datasets
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() && !group.is_empty() {
            return Err(self.not_found(group));
        }
        Ok(names.into_iter().collect())
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>> {
        let path = normalize_path(path);
        self.datasets
            .get(path)
            .map(|d| d.shape().to_vec())
            .ok_or_else(|| self.not_found(path))
    }

    fn read(&self, path: &str) -> Result<Dataset> {
        let path = normalize_path(path);
        self.datasets
            .get(path)
            .cloned()
            .ok_or_else(|| self.not_found(path))
    }

    fn write(&mut self, path: &str, data: &Dataset) -> Result<()> {
        self.datasets
            .insert(normalize_path(path).to_string(), data.clone());
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if self.datasets.remove(path).is_some() {
            return Ok(());
        }

        let prefix = Self::children_prefix(path);
        let before = self.datasets.len();
        self.datasets.retain(|k, _| !k.starts_with(&prefix));
        if self.datasets.len() == before {
            return Err(self.not_found(path));
        }
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);
        if self.exists(to) {
            return Err(StoreError::AlreadyExists {
                container: self.label.clone(),
                path: to.to_string(),
            });
        }
        let data = self
            .datasets
            .remove(from)
            .ok_or_else(|| self.not_found(from))?;
        self.datasets.insert(to.to_string(), data);
        Ok(())
    }
}
