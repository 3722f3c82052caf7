//! HDF5 container backend for on-disk `.kwik` / `.kwx` files.
//!
//! Only compiled with the `hdf5` cargo feature, which links against the HDF5
//! C library.

use std::path::Path;

use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use log::debug;

use super::container::{normalize_path, Container, Result, StoreError};
use super::dataset::Dataset;

/// A KWIK or KWX file opened read-write.
pub struct Hdf5Container {
    label: String,
    file: hdf5::File,
}

impl Hdf5Container {
    /// Open an existing HDF5 file for reading and writing.
    pub fn open_rw(path: &Path) -> Result<Self> {
        let file = hdf5::File::open_rw(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Opened HDF5 file {}", path.display());
        Ok(Self {
            label: path.display().to_string(),
            file,
        })
    }

    /// Create a new, empty HDF5 file, truncating any existing one.
    pub fn create(path: &Path) -> Result<Self> {
        let file = hdf5::File::create(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Created HDF5 file {}", path.display());
        Ok(Self {
            label: path.display().to_string(),
            file,
        })
    }

    fn not_found(&self, path: &str) -> StoreError {
        StoreError::NotFound {
            container: self.label.clone(),
            path: path.to_string(),
        }
    }

    /// Create any missing groups above `path`.
    fn ensure_parent_groups(&self, path: &str) -> Result<()> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };
        let mut prefix = String::new();
        for part in parent.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if !self.file.link_exists(&prefix) {
                self.file
                    .create_group(&prefix)
                    .map_err(|e| self.backend_error("create group", &prefix, e))?;
            }
        }
        Ok(())
    }

    fn backend_error(&self, operation: &'static str, path: &str, e: hdf5::Error) -> StoreError {
        StoreError::Backend {
            container: self.label.clone(),
            operation,
            path: path.to_string(),
            reason: e.to_string(),
        }
    }
}

impl Container for Hdf5Container {
    fn label(&self) -> &str {
        &self.label
    }

    fn exists(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if path.is_empty() {
            return true;
        }
        // H5Lexists fails rather than returning false when an intermediate
        // group is missing, so walk the path one link at a time.
        let mut prefix = String::new();
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if !self.file.link_exists(&prefix) {
                return false;
            }
        }
        true
    }

    fn members(&self, group: &str) -> Result<Vec<String>> {
        let group = normalize_path(group);
        if !self.exists(group) {
            return Err(self.not_found(group));
        }
        let name = if group.is_empty() { "/" } else { group };
        let handle = self
            .file
            .group(name)
            .map_err(|e| self.backend_error("open group", group, e))?;
        let mut names = handle
            .member_names()
            .map_err(|e| self.backend_error("list", group, e))?;
        names.sort();
        Ok(names)
    }

    fn shape(&self, path: &str) -> Result<Vec<usize>> {
        let path = normalize_path(path);
        if !self.exists(path) {
            return Err(self.not_found(path));
        }
        let ds = self
            .file
            .dataset(path)
            .map_err(|e| self.backend_error("open dataset", path, e))?;
        Ok(ds.shape())
    }

    fn read(&self, path: &str) -> Result<Dataset> {
        let path = normalize_path(path);
        if !self.exists(path) {
            return Err(self.not_found(path));
        }
        let ds = self
            .file
            .dataset(path)
            .map_err(|e| self.backend_error("open dataset", path, e))?;
        let descriptor = ds
            .dtype()
            .and_then(|t| t.to_descriptor())
            .map_err(|e| self.backend_error("inspect", path, e))?;

        let data = match descriptor {
            TypeDescriptor::Unsigned(IntSize::U1) => ds.read_dyn::<u8>().map(Dataset::U8),
            TypeDescriptor::Unsigned(IntSize::U2) => ds.read_dyn::<u16>().map(Dataset::U16),
            TypeDescriptor::Unsigned(IntSize::U4) => ds.read_dyn::<u32>().map(Dataset::U32),
            TypeDescriptor::Unsigned(IntSize::U8) => ds.read_dyn::<u64>().map(Dataset::U64),
            TypeDescriptor::Integer(IntSize::U2) => ds.read_dyn::<i16>().map(Dataset::I16),
            TypeDescriptor::Integer(IntSize::U4) => ds.read_dyn::<i32>().map(Dataset::I32),
            TypeDescriptor::Integer(IntSize::U8) => ds.read_dyn::<i64>().map(Dataset::I64),
            TypeDescriptor::Float(FloatSize::U4) => ds.read_dyn::<f32>().map(Dataset::F32),
            TypeDescriptor::Float(FloatSize::U8) => ds.read_dyn::<f64>().map(Dataset::F64),
            other => {
                return Err(StoreError::UnsupportedType {
                    container: self.label.clone(),
                    path: path.to_string(),
                    dtype: format!("{:?}", other),
                })
            }
        };

        data.map_err(|e| self.backend_error("read", path, e))
    }

    fn write(&mut self, path: &str, data: &Dataset) -> Result<()> {
        let path = normalize_path(path);
        if self.exists(path) {
            self.file
                .unlink(path)
                .map_err(|e| self.backend_error("replace", path, e))?;
        } else {
            self.ensure_parent_groups(path)?;
        }

        let builder = self.file.new_dataset_builder();
        let created = match data {
            Dataset::U8(a) => builder.with_data(a).create(path),
            Dataset::U16(a) => builder.with_data(a).create(path),
            Dataset::U32(a) => builder.with_data(a).create(path),
            Dataset::U64(a) => builder.with_data(a).create(path),
            Dataset::I16(a) => builder.with_data(a).create(path),
            Dataset::I32(a) => builder.with_data(a).create(path),
            Dataset::I64(a) => builder.with_data(a).create(path),
            Dataset::F32(a) => builder.with_data(a).create(path),
            Dataset::F64(a) => builder.with_data(a).create(path),
        };
        created.map_err(|e| self.backend_error("create", path, e))?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if !self.exists(path) {
            return Err(self.not_found(path));
        }
        self.file
            .unlink(path)
            .map_err(|e| self.backend_error("delete", path, e))
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
        if !self.exists(from) {
            return Err(self.not_found(from));
        }
        self.ensure_parent_groups(to)?;
        self.file
            .relink(from, to)
            .map_err(|e| self.backend_error("rename", from, e))
    }
}

#[cfg(all(test, feature = "hdf5"))]
mod tests {
    use super::*;
    use crate::core::container::MemoryContainer;
    use crate::core::kwik::{fixtures, open_experiment, ChannelGroupLayout, DatasetRef, KwikExperiment, Side};
    use crate::core::rewrite::{rewrite_rows, DEFAULT_STAGING_GROUP};
    use ndarray::{Array2, Array3};
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn new_file(dir: &TempDir, name: &str) -> (PathBuf, Hdf5Container) {
        let path = dir.path().join(name);
        let container = Hdf5Container::create(&path).unwrap();
        (path, container)
    }

    /// Copy every dataset of an in-memory container into an HDF5 file.
    fn copy_into(source: &MemoryContainer, target: &mut Hdf5Container) {
        for path in source.dataset_paths() {
            target.write(&path, &source.read(&path).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_write_read_every_element_type() {
        let dir = tempdir().unwrap();
        let (_, mut c) = new_file(&dir, "types.kwik");

        let datasets = vec![
            Dataset::from(vec![1u8, 2, 255]),
            Dataset::from(vec![1u16, 65535]),
            Dataset::from(vec![7u32]),
            Dataset::from(vec![0u64, u64::MAX]),
            Dataset::from(Array3::<i16>::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as i16 - 50).into_dyn()),
            Dataset::from(vec![-3i32, 4]),
            Dataset::from(vec![i64::MIN, 0]),
            Dataset::from(Array2::<f32>::from_shape_fn((3, 2), |(i, j)| i as f32 + 0.5 * j as f32).into_dyn()),
            Dataset::from(vec![0.25f64, -1.5]),
        ];

        for (i, data) in datasets.iter().enumerate() {
            let path = format!("/group/sub/ds{}", i);
            c.write(&path, data).unwrap();
            assert_eq!(c.shape(&path).unwrap(), data.shape().to_vec());
            assert_eq!(&c.read(&path).unwrap(), data, "{}", data.dtype_name());
        }
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let (_, mut c) = new_file(&dir, "replace.kwik");
        c.write("/a/b", &Dataset::from(vec![1u64, 2, 3])).unwrap();
        c.write("/a/b", &Dataset::from(vec![9u32])).unwrap();
        assert_eq!(c.read("/a/b").unwrap(), Dataset::from(vec![9u32]));
    }

    #[test]
    fn test_exists_with_missing_intermediate_group() {
        let dir = tempdir().unwrap();
        let (_, mut c) = new_file(&dir, "exists.kwik");
        c.write("/channel_groups/0/spikes/time_samples", &Dataset::from(vec![1u64]))
            .unwrap();

        assert!(c.exists("/"));
        assert!(c.exists("/channel_groups/0"));
        assert!(c.exists("channel_groups/0/spikes/time_samples"));
        assert!(!c.exists("/channel_groups/7/spikes/time_samples"));
        assert!(!c.exists("/missing/deeper/path"));
        assert!(matches!(c.read("/channel_groups/7/spikes/time_samples"), Err(StoreError::NotFound { .. })));
        assert!(matches!(c.shape("/missing"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_members_sorted() {
        let dir = tempdir().unwrap();
        let (_, mut c) = new_file(&dir, "members.kwik");
        for name in ["zeta", "alpha", "10", "2"] {
            c.write(&format!("/channel_groups/{}/x", name), &Dataset::from(vec![0u8]))
                .unwrap();
        }
        assert_eq!(c.members("/channel_groups").unwrap(), vec!["10", "2", "alpha", "zeta"]);
        assert_eq!(c.members("/").unwrap(), vec!["channel_groups"]);
        assert!(matches!(c.members("/nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_rename_and_remove() {
        let dir = tempdir().unwrap();
        let (_, mut c) = new_file(&dir, "rename.kwik");
        c.write("/g/a", &Dataset::from(vec![1i32])).unwrap();
        c.write("/g/b", &Dataset::from(vec![2i32])).unwrap();

        let clash = c.rename("/g/a", "/g/b");
        assert!(matches!(clash, Err(StoreError::AlreadyExists { .. })));
        assert_eq!(c.read("/g/a").unwrap(), Dataset::from(vec![1i32]));

        c.rename("/g/a", "/other/group/a").unwrap();
        assert!(!c.exists("/g/a"));
        assert_eq!(c.read("/other/group/a").unwrap(), Dataset::from(vec![1i32]));

        c.remove("/g/b").unwrap();
        assert!(!c.exists("/g/b"));
        assert!(matches!(c.remove("/g/b"), Err(StoreError::NotFound { .. })));

        c.remove("/other").unwrap();
        assert!(!c.exists("/other/group/a"));
    }

    #[test]
    fn test_rewrite_rows_on_files() {
        let dir = tempdir().unwrap();
        let base = fixtures::experiment();
        let (_, mut kwik) = new_file(&dir, "test.kwik");
        let (_, mut kwx) = new_file(&dir, "test.kwx");
        copy_into(base.container(Side::Kwik), &mut kwik);
        copy_into(base.container(Side::Kwx), &mut kwx);

        let mut exp = KwikExperiment::from_containers("test", kwik, kwx);
        let targets = exp.co_indexed_datasets("0").unwrap();
        assert_eq!(targets.len(), 7);

        let keep = [true, false, true, true, false];
        let summary = rewrite_rows(&mut exp, &targets, &keep, DEFAULT_STAGING_GROUP).unwrap();

        assert_eq!(summary.rows_kept, 3);
        for target in &targets {
            assert_eq!(exp.shape(target).unwrap()[0], 3, "{}", target.path);
        }
        let layout = ChannelGroupLayout::new("0");
        assert_eq!(
            exp.read(&DatasetRef::kwik(layout.time_samples())).unwrap(),
            Dataset::from(vec![0u64, 4, 100])
        );
        assert_eq!(exp.clusterings("0").unwrap(), vec!["main", "original"]);
        assert!(!exp.container(Side::Kwik).exists(DEFAULT_STAGING_GROUP));
        assert!(!exp.container(Side::Kwx).exists(DEFAULT_STAGING_GROUP));
        assert_eq!(exp.n_spikes("1").unwrap(), 2);
    }

    #[test]
    fn test_open_experiment_from_files() {
        let dir = tempdir().unwrap();
        let base = fixtures::experiment();
        {
            let (_, mut kwik) = new_file(&dir, "session.kwik");
            let (_, mut kwx) = new_file(&dir, "session.kwx");
            copy_into(base.container(Side::Kwik), &mut kwik);
            copy_into(base.container(Side::Kwx), &mut kwx);
        }

        let exp = open_experiment(&dir.path().join("session.kwik")).unwrap();
        assert_eq!(exp.name(), "session");
        assert_eq!(exp.channel_groups().unwrap(), vec!["0", "1"]);
        assert_eq!(exp.n_spikes("0").unwrap(), 5);
    }

    #[test]
    fn test_open_rejects_non_hdf5_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.kwik");
        std::fs::write(&path, b"not hdf5").unwrap();
        assert!(matches!(Hdf5Container::open_rw(&path), Err(StoreError::Open { .. })));
    }
}
