//! Export of one channel group to the KlustaKwik `.fet` / `.fmask` formats.

use std::path::{Path, PathBuf};

use log::info;
use ndarray::{s, Array2, ArrayD, Ix2, Ix3};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::KlustersConfig;
use crate::core::container::{Container, StoreError};
use crate::core::dataset::{Dataset, DatasetError};
use crate::core::kwik::{ChannelGroupLayout, DatasetRef, KwikExperiment};
use crate::core::writers::{write_fet, write_fmask, WriteError};

/// Errors that can occur during export.
#[derive(Debug, Error)]
pub enum KlustersError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("time_samples: {0}")]
    Times(#[from] DatasetError),

    #[error("features_masks must be 2- or 3-dimensional, found shape {0:?}")]
    FeatureShape(Vec<usize>),

    #[error("features_masks has {features} rows but time_samples has {times}")]
    LengthMismatch { features: usize, times: usize },
}

/// Result type for export.
pub type Result<T> = std::result::Result<T, KlustersError>;

/// Files produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlustersExport {
    pub fet_path: PathBuf,
    /// Absent when the features carry no mask column.
    pub fmask_path: Option<PathBuf>,
    pub n_spikes: usize,
    pub n_features: usize,
}

/// Split a features_masks array into features and optional masks.
///
/// Rank 3 arrays hold features in column 0 and masks in column 1 of the last
/// axis; rank 2 arrays hold features only.
fn split_features_masks(
    all: ArrayD<f64>,
) -> Result<(Array2<f64>, Option<Array2<f64>>)> {
    let shape = all.shape().to_vec();
    match all.ndim() {
        2 => {
            let features = all
                .into_dimensionality::<Ix2>()
                .map_err(|_| KlustersError::FeatureShape(shape))?;
            Ok((features, None))
        }
        3 if shape[2] >= 2 => {
            let all = all
                .into_dimensionality::<Ix3>()
                .map_err(|_| KlustersError::FeatureShape(shape))?;
            let features = all.slice(s![.., .., 0]).to_owned();
            let masks = all.slice(s![.., .., 1]).to_owned();
            Ok((features, Some(masks)))
        }
        _ => Err(KlustersError::FeatureShape(shape)),
    }
}

/// Convert features to 16-bit integers.
///
/// Floating-point features are rescaled so the largest magnitude maps to
/// `scale`; integer features are clamped into range. Runs in parallel over
/// all values.
pub fn features_to_i16(features: &Array2<f64>, is_float: bool, scale: i16) -> Array2<i16> {
    let standard = features.as_standard_layout();
    let values = standard.as_slice().unwrap_or_default();

    let factor = if is_float {
        let max_abs = values
            .par_iter()
            .map(|v| v.abs())
            .reduce(|| 0.0, f64::max);
        if max_abs == 0.0 || !max_abs.is_finite() {
            return Array2::zeros(features.raw_dim());
        }
        f64::from(scale) / max_abs
    } else {
        1.0
    };

    let mut fet = Array2::<i16>::zeros(features.raw_dim());
    if let Some(out) = fet.as_slice_mut() {
        out.par_iter_mut().zip(values.par_iter()).for_each(|(o, &v)| {
            let scaled = if is_float { (v * factor).round() } else { v };
            *o = scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        });
    }
    fet
}

/// Write `{name}.fet.{shank}` and, when masks exist, `{name}.fmask.{shank}`.
///
/// # Arguments
///
/// * `experiment` - Source experiment
/// * `shank` - Channel group to export
/// * `output_dir` - Destination directory (created if needed)
/// * `config` - Feature scaling and mask precision
pub fn export_klusters<C: Container>(
    experiment: &KwikExperiment<C>,
    shank: &str,
    output_dir: &Path,
    config: &KlustersConfig,
) -> Result<KlustersExport> {
    let layout = ChannelGroupLayout::new(shank);

    let fm: Dataset = experiment.read(&DatasetRef::kwx(layout.features_masks()))?;
    let times = experiment
        .read(&DatasetRef::kwik(layout.time_samples()))?
        .to_u64_vec()?;

    if fm.rows() != times.len() {
        return Err(KlustersError::LengthMismatch {
            features: fm.rows(),
            times: times.len(),
        });
    }

    let is_float = fm.is_float();
    let (features, masks) = split_features_masks(fm.to_f64())?;
    drop(fm);

    let fet = features_to_i16(&features, is_float, config.feature_scale);
    let fet_path = output_dir.join(format!("{}.fet.{}", experiment.name(), shank));
    info!("Writing {}", fet_path.display());
    write_fet(&fet_path, fet.view(), &times)?;

    let fmask_path = match masks {
        Some(masks) => {
            let path = output_dir.join(format!("{}.fmask.{}", experiment.name(), shank));
            info!("Writing {}", path.display());
            write_fmask(&path, masks.mapv(|v| v as f32).view(), config.mask_precision)?;
            Some(path)
        }
        None => None,
    };

    Ok(KlustersExport {
        fet_path,
        fmask_path,
        n_spikes: times.len(),
        n_features: features.ncols(),
    })
}
