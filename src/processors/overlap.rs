//! Overlapping-spike elimination.
//!
//! Two spikes are judged to be duplicate detections of the same event when
//! they are temporally close (fewer than `interval` samples apart) and their
//! spatial masks overlap (the dot product of the strided mask slices exceeds
//! `mask_min`). A single greedy forward pass keeps one spike of every chain of
//! such duplicates.
//!
//! # Example
//!
//! ```
//! use kwik_tools::processors::overlap::{filter_overlaps, NoProgress, OverlapParams, TieBreak};
//! use ndarray::Array3;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let times = [0u64, 1, 2];
//! let masks = Array3::<f32>::ones((3, 3, 2));
//! let params = OverlapParams::new(5, 0.5, TieBreak::First);
//! let mut rng = StdRng::seed_from_u64(0);
//!
//! let result = filter_overlaps(&times, masks.view(), &params, &mut rng, &mut NoProgress).unwrap();
//! assert_eq!(result.keep, vec![false, false, true]);
//! assert_eq!(result.discarded, 2);
//! ```

use ndarray::{s, ArrayView3};
use rand::Rng;
use thiserror::Error;

/// Spike count between two progress reports.
pub const PROGRESS_STEP: usize = 1000;

/// Stride of the mask slice compared between spikes.
pub const MASK_STRIDE: usize = 3;

/// Column of each mask row holding the mask value.
pub const MASK_COLUMN: usize = 1;

/// Errors raised for malformed filter input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OverlapError {
    /// `masks` does not have one entry per spike.
    #[error("got {masks} mask rows for {spikes} spikes")]
    MaskCountMismatch { spikes: usize, masks: usize },

    /// Mask rows are too narrow for the strided mask column.
    #[error("mask rows have {columns} column(s); at least {} are required", MASK_COLUMN + 1)]
    MalformedMask { columns: usize },
}

/// Result type for the overlap filter.
pub type Result<T> = std::result::Result<T, OverlapError>;

/// Which spike of an overlapping pair is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Pick the spike to discard uniformly at random.
    #[default]
    Random,
    /// Always discard the earlier spike.
    First,
}

impl TieBreak {
    /// Map the command-line `RAND_DISC` flag onto a policy.
    pub fn from_rand_disc(rand_disc: bool) -> Self {
        if rand_disc {
            TieBreak::Random
        } else {
            TieBreak::First
        }
    }

    /// Returns true when the earlier spike of a pair should be discarded.
    #[inline]
    fn discard_first<R: Rng + ?Sized>(self, rng: &mut R) -> bool {
        match self {
            TieBreak::Random => rng.gen_bool(0.5),
            TieBreak::First => true,
        }
    }
}

/// Thresholds and policy for one filter pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapParams {
    /// Spikes closer than this many samples are temporally close.
    pub interval: u64,
    /// Mask dot products above this value count as spatial overlap.
    pub mask_min: f64,
    pub tie_break: TieBreak,
}

impl OverlapParams {
    pub fn new(interval: u64, mask_min: f64, tie_break: TieBreak) -> Self {
        Self {
            interval,
            mask_min,
            tie_break,
        }
    }
}

/// Keep/discard decision for every spike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapResult {
    /// One entry per input spike; `true` = retained.
    pub keep: Vec<bool>,
    /// Number of `false` entries in `keep`.
    pub discarded: usize,
}

impl OverlapResult {
    #[inline]
    pub fn len(&self) -> usize {
        self.keep.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Number of retained spikes.
    #[inline]
    pub fn kept(&self) -> usize {
        self.keep.len() - self.discarded
    }
}

/// Snapshot of a running filter pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Cursor position (index of the current anchor spike).
    pub position: usize,
    pub total: usize,
    pub discarded: usize,
}

impl Progress {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        100.0 * self.position as f64 / self.total as f64
    }

    /// Discarded spikes as a percentage of the spikes scanned so far.
    pub fn percent_discarded(&self) -> f64 {
        if self.position == 0 {
            return 0.0;
        }
        100.0 * self.discarded as f64 / self.position as f64
    }
}

/// Receiver of progress reports. Must not influence the filter outcome.
pub trait ProgressSink {
    /// Called when a new pass over `total` spikes starts.
    fn begin(&mut self, _label: &str, _total: usize) {}

    /// Called whenever the cursor passes a progress checkpoint.
    fn report(&mut self, progress: &Progress);

    /// Called once the pass is complete.
    fn finish(&mut self, _result: &OverlapResult) {}
}

/// Progress sink that ignores all reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Dot product of the strided mask slices of spikes `i` and `j`.
#[inline]
fn mask_overlap(masks: &ArrayView3<'_, f32>, i: usize, j: usize) -> f64 {
    let a = masks.slice(s![i, ..;MASK_STRIDE, MASK_COLUMN]);
    let b = masks.slice(s![j, ..;MASK_STRIDE, MASK_COLUMN]);
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Returns true if spikes `i` (anchor) and `j` (later candidate) overlap.
///
/// The temporal gate is checked first with integer arithmetic; masks are only
/// compared for temporally close pairs.
#[inline]
fn is_overlap(
    time_samples: &[u64],
    masks: &ArrayView3<'_, f32>,
    params: &OverlapParams,
    i: usize,
    j: usize,
) -> bool {
    let gap = i128::from(time_samples[j]) - i128::from(time_samples[i]);
    if gap >= i128::from(params.interval) {
        return false;
    }
    mask_overlap(masks, i, j) > params.mask_min
}

/// Decide which spikes to discard as overlapping duplicates.
///
/// Runs a single forward pass with an anchor cursor `lo` and a candidate
/// cursor `hi`. While the pair overlaps, one of the two is discarded
/// according to `params.tie_break`: discarding the anchor moves the anchor to
/// the candidate, discarding the candidate keeps the anchor. Either way the
/// candidate advances, so chains of mutually close spikes collapse to a
/// single survivor. Once a pair no longer overlaps, scanning restarts from
/// the candidate.
///
/// # Arguments
///
/// * `time_samples` - Spike times in samples, ascending
/// * `masks` - Per-spike mask matrices, shape `(n_spikes, n_features, k)`
///   with `k >= 2`; only `[.., ::3, 1]` is inspected
/// * `params` - Interval, mask threshold and tie-break policy
/// * `rng` - Random source for [`TieBreak::Random`]
/// * `progress` - Receives a report every [`PROGRESS_STEP`] spikes
///
/// # Errors
///
/// Returns an error if `masks` does not have one row per spike, or if mask
/// rows have fewer than two columns.
pub fn filter_overlaps<R, P>(
    time_samples: &[u64],
    masks: ArrayView3<'_, f32>,
    params: &OverlapParams,
    rng: &mut R,
    progress: &mut P,
) -> Result<OverlapResult>
where
    R: Rng + ?Sized,
    P: ProgressSink + ?Sized,
{
    let n = time_samples.len();
    let (n_masks, _, columns) = masks.dim();

    if n_masks != n {
        return Err(OverlapError::MaskCountMismatch {
            spikes: n,
            masks: n_masks,
        });
    }
    // Checked even when no pair will be compared (n <= 1)
    if columns <= MASK_COLUMN {
        return Err(OverlapError::MalformedMask { columns });
    }

    let mut keep = vec![true; n];
    let mut discarded = 0usize;
    let mut next_checkpoint = PROGRESS_STEP;
    let mut lo = 0usize;
    let mut hi = 1usize;

    while hi < n {
        while is_overlap(time_samples, &masks, params, lo, hi) {
            if params.tie_break.discard_first(rng) {
                keep[lo] = false;
                lo = hi;
            } else {
                keep[hi] = false;
            }
            discarded += 1;

            hi += 1;
            if hi >= n {
                break;
            }
        }

        lo = hi;
        hi = lo + 1;

        if lo >= next_checkpoint {
            progress.report(&Progress {
                position: lo,
                total: n,
                discarded,
            });
            next_checkpoint = (lo + 1).div_ceil(PROGRESS_STEP) * PROGRESS_STEP;
        }
    }

    Ok(OverlapResult { keep, discarded })
}
