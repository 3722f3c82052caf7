//! Removal of overlapping spikes from every channel group of an experiment.

use log::info;
use ndarray::Ix3;
use rand::Rng;
use thiserror::Error;

use crate::core::container::{Container, StoreError};
use crate::core::dataset::DatasetError;
use crate::core::kwik::{ChannelGroupLayout, DatasetRef, KwikExperiment};
use crate::core::rewrite::{rewrite_rows, RewriteError, DEFAULT_STAGING_GROUP};
use crate::processors::overlap::{filter_overlaps, OverlapError, OverlapParams, ProgressSink};

/// Errors that can occur while cleaning an experiment.
#[derive(Debug, Error)]
pub enum IsiCleanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("channel group {group}: {path}: {source}")]
    Dataset {
        group: String,
        path: String,
        #[source]
        source: DatasetError,
    },

    #[error("channel group {group}: features_masks must be 3-dimensional, found shape {shape:?}")]
    MaskShape { group: String, shape: Vec<usize> },

    #[error("channel group {group}: {source}")]
    Overlap {
        group: String,
        #[source]
        source: OverlapError,
    },

    #[error("channel group {group}: {source}")]
    Rewrite {
        group: String,
        #[source]
        source: RewriteError,
    },
}

/// Result type for ISI cleaning.
pub type Result<T> = std::result::Result<T, IsiCleanError>;

/// Settings for one cleaning run.
#[derive(Debug, Clone)]
pub struct IsiCleanParams {
    pub overlap: OverlapParams,
    /// Compute and report without rewriting any dataset.
    pub dry_run: bool,
    /// Root group for staged copies during the rewrite.
    pub staging_group: String,
}

impl IsiCleanParams {
    pub fn new(overlap: OverlapParams) -> Self {
        Self {
            overlap,
            dry_run: false,
            staging_group: DEFAULT_STAGING_GROUP.to_string(),
        }
    }
}

/// Outcome for one channel group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub channel_group: String,
    pub n_spikes: usize,
    pub n_discarded: usize,
    /// Datasets that were rewritten (empty for dry runs or when nothing was
    /// discarded).
    pub rewritten: Vec<String>,
}

impl GroupReport {
    #[inline]
    pub fn n_kept(&self) -> usize {
        self.n_spikes - self.n_discarded
    }

    pub fn percent_discarded(&self) -> f64 {
        if self.n_spikes == 0 {
            return 0.0;
        }
        100.0 * self.n_discarded as f64 / self.n_spikes as f64
    }
}

/// Filter overlapping spikes out of a single channel group.
///
/// Reads `time_samples` and `features_masks`, runs the overlap filter, and
/// (unless `params.dry_run`) rewrites every co-indexed dataset of the group
/// down to the kept spikes.
pub fn clean_channel_group<C, R, P>(
    experiment: &mut KwikExperiment<C>,
    channel_group: &str,
    params: &IsiCleanParams,
    rng: &mut R,
    progress: &mut P,
) -> Result<GroupReport>
where
    C: Container,
    R: Rng + ?Sized,
    P: ProgressSink + ?Sized,
{
    let layout = ChannelGroupLayout::new(channel_group);

    let ts_path = layout.time_samples();
    let time_samples = experiment
        .read(&DatasetRef::kwik(ts_path.clone()))?
        .to_u64_vec()
        .map_err(|source| IsiCleanError::Dataset {
            group: channel_group.to_string(),
            path: ts_path,
            source,
        })?;

    let fm = experiment.read(&DatasetRef::kwx(layout.features_masks()))?;
    let masks = fm
        .to_f32()
        .into_dimensionality::<Ix3>()
        .map_err(|_| IsiCleanError::MaskShape {
            group: channel_group.to_string(),
            shape: fm.shape().to_vec(),
        })?;
    drop(fm);

    info!(
        "Channel group {}: temporal overlap: {}. Spatial mask overlap: {}. Tie-break: {:?}",
        channel_group, params.overlap.interval, params.overlap.mask_min, params.overlap.tie_break
    );

    progress.begin(channel_group, time_samples.len());
    let result = filter_overlaps(&time_samples, masks.view(), &params.overlap, rng, progress)
        .map_err(|source| IsiCleanError::Overlap {
            group: channel_group.to_string(),
            source,
        })?;
    progress.finish(&result);
    drop(masks);

    let n_spikes = result.len();
    info!(
        "100% complete, discarded {} spikes ({:.1}%). n_spikes: {} -> {}.",
        result.discarded,
        if n_spikes == 0 {
            0.0
        } else {
            100.0 * result.discarded as f64 / n_spikes as f64
        },
        n_spikes,
        result.kept()
    );

    let mut rewritten = Vec::new();
    if params.dry_run {
        info!("Dry run: channel group {} left unchanged", channel_group);
    } else if result.discarded > 0 {
        let targets = experiment.co_indexed_datasets(channel_group)?;
        let summary = rewrite_rows(experiment, &targets, &result.keep, &params.staging_group)
            .map_err(|source| IsiCleanError::Rewrite {
                group: channel_group.to_string(),
                source,
            })?;
        rewritten = summary.rewritten;
    }

    Ok(GroupReport {
        channel_group: channel_group.to_string(),
        n_spikes,
        n_discarded: result.discarded,
        rewritten,
    })
}

/// Filter overlapping spikes out of every channel group, in name order.
///
/// Stops at the first failing group; groups already processed stay
/// rewritten.
pub fn clean_experiment<C, R, P>(
    experiment: &mut KwikExperiment<C>,
    params: &IsiCleanParams,
    rng: &mut R,
    progress: &mut P,
) -> Result<Vec<GroupReport>>
where
    C: Container,
    R: Rng + ?Sized,
    P: ProgressSink + ?Sized,
{
    let groups = experiment.channel_groups()?;
    let mut reports = Vec::with_capacity(groups.len());

    for group in &groups {
        reports.push(clean_channel_group(experiment, group, params, rng, progress)?);
    }

    Ok(reports)
}
