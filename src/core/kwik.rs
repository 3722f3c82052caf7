//! KWIK/KWX experiment layout.
//!
//! A KWIK experiment is a pair of files sharing a path stem: the `.kwik` file
//! holds spike times, recording ids and clusterings; the companion `.kwx`
//! file holds features, masks and waveforms. Both are organised by channel
//! group under `/channel_groups/{name}`.

use std::path::{Path, PathBuf};

use log::info;

use super::container::{Container, Result, StoreError};
use super::dataset::Dataset;

/// Extension of the primary experiment file.
pub const KWIK_EXTENSION: &str = "kwik";

/// Extension of the companion features/waveforms file.
pub const KWX_EXTENSION: &str = "kwx";

/// Root group holding one subgroup per channel group.
pub const CHANNEL_GROUPS: &str = "/channel_groups";

/// Returns true if `path` ends in `.kwik`.
pub fn has_kwik_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == KWIK_EXTENSION)
        .unwrap_or(false)
}

/// Path of the `.kwx` file that accompanies a `.kwik` file.
pub fn kwx_path_for(kwik_path: &Path) -> PathBuf {
    kwik_path.with_extension(KWX_EXTENSION)
}

/// Dataset paths for one channel group.
#[derive(Debug, Clone)]
pub struct ChannelGroupLayout {
    base: String,
}

impl ChannelGroupLayout {
    pub fn new(channel_group: &str) -> Self {
        Self {
            base: format!("{}/{}", CHANNEL_GROUPS, channel_group),
        }
    }

    /// `/channel_groups/{g}` in either file.
    pub fn group(&self) -> &str {
        &self.base
    }

    pub fn time_samples(&self) -> String {
        format!("{}/spikes/time_samples", self.base)
    }

    pub fn time_fractional(&self) -> String {
        format!("{}/spikes/time_fractional", self.base)
    }

    pub fn recording(&self) -> String {
        format!("{}/spikes/recording", self.base)
    }

    pub fn clusters(&self) -> String {
        format!("{}/spikes/clusters", self.base)
    }

    pub fn clustering(&self, name: &str) -> String {
        format!("{}/spikes/clusters/{}", self.base, name)
    }

    pub fn features_masks(&self) -> String {
        format!("{}/features_masks", self.base)
    }

    pub fn waveforms_raw(&self) -> String {
        format!("{}/waveforms_raw", self.base)
    }

    pub fn waveforms_filtered(&self) -> String {
        format!("{}/waveforms_filtered", self.base)
    }
}

/// Which file of the experiment a dataset lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Kwik,
    Kwx,
}

/// A dataset location within an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub side: Side,
    pub path: String,
}

impl DatasetRef {
    pub fn kwik(path: impl Into<String>) -> Self {
        Self {
            side: Side::Kwik,
            path: path.into(),
        }
    }

    pub fn kwx(path: impl Into<String>) -> Self {
        Self {
            side: Side::Kwx,
            path: path.into(),
        }
    }
}

/// An opened `.kwik` / `.kwx` pair.
pub struct KwikExperiment<C: Container> {
    name: String,
    kwik: C,
    kwx: C,
}

impl<C: Container> KwikExperiment<C> {
    /// Assemble an experiment from two already-open containers.
    pub fn from_containers(name: impl Into<String>, kwik: C, kwx: C) -> Self {
        Self {
            name: name.into(),
            kwik,
            kwx,
        }
    }

    /// Experiment name (the file stem shared by both files).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self, side: Side) -> &C {
        match side {
            Side::Kwik => &self.kwik,
            Side::Kwx => &self.kwx,
        }
    }

    pub fn container_mut(&mut self, side: Side) -> &mut C {
        match side {
            Side::Kwik => &mut self.kwik,
            Side::Kwx => &mut self.kwx,
        }
    }

    /// Channel group names found in the `.kwik` file, sorted.
    pub fn channel_groups(&self) -> Result<Vec<String>> {
        self.kwik.members(CHANNEL_GROUPS)
    }

    /// Returns true if the dataset exists.
    pub fn exists(&self, dataset: &DatasetRef) -> bool {
        self.container(dataset.side).exists(&dataset.path)
    }

    /// Read a dataset from whichever file holds it.
    pub fn read(&self, dataset: &DatasetRef) -> Result<Dataset> {
        self.container(dataset.side).read(&dataset.path)
    }

    /// Shape of a dataset, without reading its data.
    pub fn shape(&self, dataset: &DatasetRef) -> Result<Vec<usize>> {
        self.container(dataset.side).shape(&dataset.path)
    }

    /// Number of spikes in a channel group, from its `time_samples`.
    pub fn n_spikes(&self, channel_group: &str) -> Result<usize> {
        let layout = ChannelGroupLayout::new(channel_group);
        let shape = self.kwik.shape(&layout.time_samples())?;
        Ok(shape.first().copied().unwrap_or(0))
    }

    /// Names of the clusterings stored for a channel group.
    pub fn clusterings(&self, channel_group: &str) -> Result<Vec<String>> {
        let layout = ChannelGroupLayout::new(channel_group);
        let path = layout.clusters();
        if !self.kwik.exists(&path) {
            return Ok(Vec::new());
        }
        self.kwik.members(&path)
    }

    /// Every dataset indexed by spike in a channel group.
    ///
    /// `features_masks` and `time_samples` are always listed; the recording,
    /// fractional-time and waveform datasets only when present. Clusterings
    /// come last.
    pub fn co_indexed_datasets(&self, channel_group: &str) -> Result<Vec<DatasetRef>> {
        let layout = ChannelGroupLayout::new(channel_group);

        let mut datasets = vec![
            DatasetRef::kwx(layout.features_masks()),
            DatasetRef::kwik(layout.time_samples()),
        ];

        let optional = [
            DatasetRef::kwik(layout.time_fractional()),
            DatasetRef::kwik(layout.recording()),
            DatasetRef::kwx(layout.waveforms_raw()),
            DatasetRef::kwx(layout.waveforms_filtered()),
        ];
        datasets.extend(optional.into_iter().filter(|d| self.exists(d)));

        for name in self.clusterings(channel_group)? {
            datasets.push(DatasetRef::kwik(layout.clustering(&name)));
        }

        Ok(datasets)
    }
}

#[cfg(feature = "hdf5")]
fn open_container(path: &Path) -> Result<Box<dyn Container>> {
    let container = super::hdf5_store::Hdf5Container::open_rw(path)?;
    Ok(Box::new(container))
}

#[cfg(not(feature = "hdf5"))]
fn open_container(path: &Path) -> Result<Box<dyn Container>> {
    Err(StoreError::Open {
        path: path.to_path_buf(),
        reason: "built without HDF5 support (rebuild with `--features hdf5`)".to_string(),
    })
}

/// Open a `.kwik` file and its companion `.kwx` file for reading and writing.
///
/// Both files are opened before anything else happens, so a failure on either
/// leaves the experiment untouched.
///
/// # Errors
///
/// Returns [`StoreError::Open`] if either file is missing, unreadable, or not
/// a valid container.
pub fn open_experiment(kwik_path: &Path) -> Result<KwikExperiment<Box<dyn Container>>> {
    let kwx_path = kwx_path_for(kwik_path);

    for path in [kwik_path, kwx_path.as_path()] {
        if !path.is_file() {
            return Err(StoreError::Open {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
    }

    info!("Opening {}...", kwik_path.display());
    let kwik = open_container(kwik_path)?;
    info!("Opening {}...", kwx_path.display());
    let kwx = open_container(&kwx_path)?;

    let name = kwik_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(KwikExperiment::from_containers(name, kwik, kwx))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::core::container::MemoryContainer;
    use ndarray::Array3;

    /// Mask value placed on every third feature of column 1.
    pub const STRONG_MASK: f32 = 1.0;

    /// Build a features_masks array whose strided mask slice is `mask` for
    /// every spike flagged in `strong`, and zero otherwise.
    pub fn features_masks(n: usize, n_features: usize, strong: &[bool]) -> Array3<f32> {
        Array3::from_shape_fn((n, n_features, 2), |(i, f, c)| match c {
            0 => (i * 10 + f) as f32,
            _ if f % 3 == 0 && strong[i] => STRONG_MASK,
            _ => 0.0,
        })
    }

    /// A two-group experiment: group "0" with five spikes, group "1" with two.
    pub fn experiment() -> KwikExperiment<MemoryContainer> {
        let g0 = ChannelGroupLayout::new("0");
        let g1 = ChannelGroupLayout::new("1");

        let kwik = MemoryContainer::new("test.kwik")
            .with_dataset(&g0.time_samples(), vec![0u64, 2, 4, 100, 300])
            .with_dataset(&g0.time_fractional(), vec![0u8, 1, 2, 3, 4])
            .with_dataset(&g0.recording(), vec![0u16, 0, 0, 1, 1])
            .with_dataset(&g0.clustering("main"), vec![3u32, 3, 4, 5, 6])
            .with_dataset(&g0.clustering("original"), vec![0u32, 1, 2, 3, 4])
            .with_dataset(&g1.time_samples(), vec![10u64, 11])
            .with_dataset(&g1.clustering("main"), vec![0u32, 0]);

        let strong = [true, true, true, true, true];
        let kwx = MemoryContainer::new("test.kwx")
            .with_dataset(
                &g0.features_masks(),
                features_masks(5, 6, &strong).into_dyn(),
            )
            .with_dataset(
                &g0.waveforms_raw(),
                Array3::<i16>::from_shape_fn((5, 4, 3), |(i, _, _)| i as i16).into_dyn(),
            )
            .with_dataset(
                &g1.features_masks(),
                features_masks(2, 3, &[false, false]).into_dyn(),
            );

        KwikExperiment::from_containers("test", kwik, kwx)
    }
}
