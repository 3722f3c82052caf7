//! Adding externally computed clusterings to an experiment.

use std::path::Path;

use log::info;
use thiserror::Error;

use crate::core::container::{Container, StoreError};
use crate::core::dataset::Dataset;
use crate::core::kwik::{ChannelGroupLayout, KwikExperiment, Side};
use crate::core::loaders::{load_spike_clusters, LoaderError};

/// Errors that can occur while importing a clustering.
#[derive(Debug, Error)]
pub enum ClusterImportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error("experiment has no channel groups")]
    NoChannelGroups,

    #[error("no channel group named '{0}'")]
    UnknownChannelGroup(String),

    #[error("invalid clustering name '{0}'")]
    InvalidName(String),

    #[error("clustering '{name}' already exists in channel group {group}")]
    AlreadyExists { group: String, name: String },

    #[error("{labels} cluster labels given for {spikes} spikes")]
    LengthMismatch { spikes: usize, labels: usize },
}

/// Result type for clustering import.
pub type Result<T> = std::result::Result<T, ClusterImportError>;

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ClusterImportError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Pick the requested channel group, or the first one when none is given.
fn resolve_channel_group<C: Container>(
    experiment: &KwikExperiment<C>,
    channel_group: Option<&str>,
) -> Result<String> {
    let groups = experiment.channel_groups()?;
    match channel_group {
        Some(requested) => groups
            .into_iter()
            .find(|g| g == requested)
            .ok_or_else(|| ClusterImportError::UnknownChannelGroup(requested.to_string())),
        None => groups
            .into_iter()
            .next()
            .ok_or(ClusterImportError::NoChannelGroups),
    }
}

/// Store `labels` as a new clustering of a channel group.
///
/// # Arguments
///
/// * `experiment` - Target experiment
/// * `channel_group` - Channel group name; the first group if `None`
/// * `name` - Clustering name, a single path component
/// * `labels` - Zero-based cluster label per spike
///
/// # Returns
///
/// The path of the new clustering dataset.
///
/// # Errors
///
/// Fails without writing if the group does not exist, the name is invalid or
/// already taken, or the label count differs from the group's spike count.
pub fn add_clustering<C: Container>(
    experiment: &mut KwikExperiment<C>,
    channel_group: Option<&str>,
    name: &str,
    labels: &[u32],
) -> Result<String> {
    validate_name(name)?;
    let group = resolve_channel_group(experiment, channel_group)?;

    if experiment.clusterings(&group)?.iter().any(|c| c == name) {
        return Err(ClusterImportError::AlreadyExists {
            group,
            name: name.to_string(),
        });
    }

    let spikes = experiment.n_spikes(&group)?;
    if spikes != labels.len() {
        return Err(ClusterImportError::LengthMismatch {
            spikes,
            labels: labels.len(),
        });
    }

    let path = ChannelGroupLayout::new(&group).clustering(name);
    experiment
        .container_mut(Side::Kwik)
        .write(&path, &Dataset::from(labels.to_vec()))?;

    info!(
        "Added clustering '{}' to channel group {} ({} spikes)",
        name, group, spikes
    );
    Ok(path)
}

/// Load a spike cluster file and store it as a new clustering.
pub fn import_spike_clusters<C: Container>(
    experiment: &mut KwikExperiment<C>,
    spike_clusters: &Path,
    channel_group: Option<&str>,
    name: &str,
) -> Result<String> {
    info!("Loading {}", spike_clusters.display());
    let labels = load_spike_clusters(spike_clusters)?;
    info!("Loaded {} spikes", labels.len());
    add_clustering(experiment, channel_group, name, &labels)
}
