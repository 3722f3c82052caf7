//! Row-filtering rewrite of co-indexed datasets.
//!
//! Containers have no "delete rows" operation, so filtering spikes means
//! replacing every co-indexed dataset with a filtered copy. The rewrite runs
//! as one batch in three phases:
//!
//! 1. **Validate**: every target must have one row per keep-mask entry,
//!    checked from shapes alone. Nothing is read or written if any target
//!    disagrees.
//! 2. **Stage**: targets are read, filtered and written one at a time under a
//!    separate staging group, so only one dataset is held in memory. A
//!    failure here removes the staged copies again, leaving the originals
//!    untouched.
//! 3. **Commit**: each original is deleted and its staged copy moved into
//!    place. A failure here leaves the store inconsistent and is reported as
//!    such.
//!
//! Staged copies live under `/{staging_group}/...`, outside every channel
//! group, so a copy left behind by a failed commit is never mistaken for a
//! clustering or any other co-indexed dataset.

use log::{debug, info, warn};
use thiserror::Error;

use super::container::{normalize_path, Container, StoreError};
use super::dataset::DatasetError;
use super::kwik::{DatasetRef, KwikExperiment, Side};

/// Default root group for staged copies.
pub const DEFAULT_STAGING_GROUP: &str = "__staging";

/// Errors that can occur while rewriting datasets.
#[derive(Error, Debug)]
pub enum RewriteError {
    /// A target has a different number of rows than the keep-mask.
    #[error("dataset '{path}' has {rows} rows, expected {expected}")]
    LengthMismatch {
        path: String,
        rows: usize,
        expected: usize,
    },

    /// Reading or staging failed; the originals were not modified.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A target could not be filtered.
    #[error("failed to filter '{path}': {source}")]
    Filter {
        path: String,
        #[source]
        source: DatasetError,
    },

    /// Committing failed part-way; the store may now hold datasets of
    /// different lengths and should be restored from a backup.
    #[error("commit failed at '{failed}' after rewriting {} dataset(s); store may be inconsistent: {source}", committed.len())]
    PartialCommit {
        committed: Vec<String>,
        failed: String,
        #[source]
        source: StoreError,
    },
}

/// Result type for rewrite operations.
pub type Result<T> = std::result::Result<T, RewriteError>;

/// Outcome of a successful rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Paths of the rewritten datasets, in target order.
    pub rewritten: Vec<String>,
    /// Row count after filtering.
    pub rows_kept: usize,
}

/// Location of the staged copy of `path`.
pub fn staging_path(path: &str, staging_group: &str) -> String {
    format!(
        "/{}/{}",
        normalize_path(staging_group),
        normalize_path(path)
    )
}

/// Drop the staging group from both files once it is no longer needed.
fn remove_staging_group<C: Container>(experiment: &mut KwikExperiment<C>, staging_group: &str) {
    for side in [Side::Kwik, Side::Kwx] {
        let container = experiment.container_mut(side);
        if container.exists(staging_group) {
            if let Err(e) = container.remove(staging_group) {
                warn!("Failed to remove staging group {}: {}", staging_group, e);
            }
        }
    }
}

/// Replace every target dataset with its rows selected by `keep`.
///
/// # Arguments
///
/// * `experiment` - Experiment holding the targets
/// * `targets` - Co-indexed datasets, all with `keep.len()` rows
/// * `keep` - Row selection; `true` rows are retained
/// * `staging_group` - Root group for the temporary staged copies
///
/// # Errors
///
/// See [`RewriteError`]. Only [`RewriteError::PartialCommit`] indicates that
/// the store was modified.
pub fn rewrite_rows<C: Container>(
    experiment: &mut KwikExperiment<C>,
    targets: &[DatasetRef],
    keep: &[bool],
    staging_group: &str,
) -> Result<RewriteSummary> {
    // Phase 1: check lengths from shapes before touching the store
    for target in targets {
        let shape = experiment.shape(target)?;
        let rows = shape.first().copied().unwrap_or(0);
        if shape.is_empty() || rows != keep.len() {
            return Err(RewriteError::LengthMismatch {
                path: target.path.clone(),
                rows,
                expected: keep.len(),
            });
        }
    }

    // Phase 2: read, filter and stage one dataset at a time
    let mut staged: Vec<&DatasetRef> = Vec::with_capacity(targets.len());
    for target in targets {
        let temp = staging_path(&target.path, staging_group);
        let outcome = experiment
            .read(target)
            .map_err(RewriteError::from)
            .and_then(|data| {
                data.select_rows(keep).map_err(|source| RewriteError::Filter {
                    path: target.path.clone(),
                    source,
                })
            })
            .and_then(|filtered| {
                debug!("Staging {} ({} rows)", temp, filtered.rows());
                experiment
                    .container_mut(target.side)
                    .write(&temp, &filtered)
                    .map_err(RewriteError::from)
            });

        if let Err(e) = outcome {
            for done in &staged {
                let temp = staging_path(&done.path, staging_group);
                if let Err(cleanup) = experiment.container_mut(done.side).remove(&temp) {
                    warn!("Failed to remove staged dataset {}: {}", temp, cleanup);
                }
            }
            remove_staging_group(experiment, staging_group);
            return Err(e);
        }
        staged.push(target);
    }

    // Phase 3: move staged copies into place
    let mut committed = Vec::with_capacity(targets.len());
    for target in targets {
        info!("Resizing {}", target.path);
        let temp = staging_path(&target.path, staging_group);
        let container = experiment.container_mut(target.side);
        if let Err(source) = container
            .remove(&target.path)
            .and_then(|_| container.rename(&temp, &target.path))
        {
            return Err(RewriteError::PartialCommit {
                committed,
                failed: target.path.clone(),
                source,
            });
        }
        committed.push(target.path.clone());
    }
    remove_staging_group(experiment, staging_group);

    Ok(RewriteSummary {
        rewritten: committed,
        rows_kept: keep.iter().filter(|&&k| k).count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::{self, MemoryContainer};
    use crate::core::dataset::Dataset;
    use crate::core::kwik::{fixtures, ChannelGroupLayout};

    const KEEP: [bool; 5] = [true, false, true, true, false];

    /// Container that refuses writes or renames onto paths containing a marker.
    struct Faulty {
        inner: MemoryContainer,
        write_marker: &'static str,
        rename_marker: &'static str,
    }

    impl Faulty {
        fn wrap(inner: &MemoryContainer) -> Self {
            Self {
                inner: inner.clone(),
                write_marker: "never-matches",
                rename_marker: "never-matches",
            }
        }

        fn refuse(&self, operation: &'static str, path: &str) -> StoreError {
            StoreError::Backend {
                container: self.inner.label().to_string(),
                operation,
                path: path.to_string(),
                reason: "disk full".to_string(),
            }
        }
    }

    impl Container for Faulty {
        fn label(&self) -> &str {
            self.inner.label()
        }
        fn exists(&self, path: &str) -> bool {
            self.inner.exists(path)
        }
        fn members(&self, group: &str) -> container::Result<Vec<String>> {
            self.inner.members(group)
        }
        fn shape(&self, path: &str) -> container::Result<Vec<usize>> {
            self.inner.shape(path)
        }
        fn read(&self, path: &str) -> container::Result<Dataset> {
            self.inner.read(path)
        }
        fn write(&mut self, path: &str, data: &Dataset) -> container::Result<()> {
            if path.contains(self.write_marker) {
                return Err(self.refuse("create", path));
            }
            self.inner.write(path, data)
        }
        fn remove(&mut self, path: &str) -> container::Result<()> {
            self.inner.remove(path)
        }
        fn rename(&mut self, from: &str, to: &str) -> container::Result<()> {
            if to.contains(self.rename_marker) {
                return Err(self.refuse("rename", to));
            }
            self.inner.rename(from, to)
        }
    }

    fn faulty_experiment(kwik: Faulty, kwx: Faulty) -> KwikExperiment<Faulty> {
        KwikExperiment::from_containers("test", kwik, kwx)
    }

    #[test]
    fn test_rewrite_filters_all_targets() {
        let mut exp = fixtures::experiment();
        let targets = exp.co_indexed_datasets("0").unwrap();

        let summary = rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP).unwrap();

        assert_eq!(summary.rows_kept, 3);
        assert_eq!(summary.rewritten.len(), targets.len());
        for target in &targets {
            assert_eq!(exp.read(target).unwrap().rows(), 3, "{}", target.path);
        }

        let layout = ChannelGroupLayout::new("0");
        let ts = exp.read(&DatasetRef::kwik(layout.time_samples())).unwrap();
        assert_eq!(ts, Dataset::from(vec![0u64, 4, 100]));
        let clusters = exp.read(&DatasetRef::kwik(layout.clustering("main"))).unwrap();
        assert_eq!(clusters, Dataset::from(vec![3u32, 4, 5]));
    }

    #[test]
    fn test_rewrite_leaves_no_staging_datasets() {
        let mut exp = fixtures::experiment();
        let targets = exp.co_indexed_datasets("0").unwrap();
        rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP).unwrap();

        for side in [Side::Kwik, Side::Kwx] {
            assert!(!exp.container(side).exists(DEFAULT_STAGING_GROUP));
            assert!(exp
                .container(side)
                .dataset_paths()
                .iter()
                .all(|p| !p.contains(DEFAULT_STAGING_GROUP)));
        }
    }

    #[test]
    fn test_staging_path_is_outside_channel_groups() {
        assert_eq!(
            staging_path("/channel_groups/0/spikes/clusters/main", "__staging"),
            "/__staging/channel_groups/0/spikes/clusters/main"
        );
        assert_eq!(staging_path("a/b", "/tmp/"), "/tmp/a/b");
    }

    #[test]
    fn test_partial_commit_leftovers_are_not_co_indexed() {
        let base = fixtures::experiment();
        let mut kwik = Faulty::wrap(base.container(Side::Kwik));
        kwik.rename_marker = "clusters/original";
        let kwx = Faulty::wrap(base.container(Side::Kwx));
        let mut exp = faulty_experiment(kwik, kwx);
        let before = exp.co_indexed_datasets("0").unwrap();

        let result = rewrite_rows(&mut exp, &before, &KEEP, DEFAULT_STAGING_GROUP);

        match result {
            Err(RewriteError::PartialCommit { committed, failed, .. }) => {
                assert_eq!(failed, "/channel_groups/0/spikes/clusters/original");
                assert_eq!(committed.len(), before.len() - 1);
            }
            other => panic!("expected PartialCommit, got {:?}", other),
        }

        // The staged copy survives, but only under the staging group
        let leftover = staging_path(
            "/channel_groups/0/spikes/clusters/original",
            DEFAULT_STAGING_GROUP,
        );
        assert!(exp.container(Side::Kwik).exists(&leftover));
        assert_eq!(exp.clusterings("0").unwrap(), vec!["main"]);
        assert!(exp
            .co_indexed_datasets("0")
            .unwrap()
            .iter()
            .all(|d| !d.path.contains(DEFAULT_STAGING_GROUP)));
    }

    #[test]
    fn test_length_check_does_not_read_data() {
        struct NoReads(MemoryContainer);

        impl Container for NoReads {
            fn label(&self) -> &str {
                self.0.label()
            }
            fn exists(&self, path: &str) -> bool {
                self.0.exists(path)
            }
            fn members(&self, group: &str) -> container::Result<Vec<String>> {
                self.0.members(group)
            }
            fn shape(&self, path: &str) -> container::Result<Vec<usize>> {
                self.0.shape(path)
            }
            fn read(&self, path: &str) -> container::Result<Dataset> {
                panic!("unexpected read of {}", path)
            }
            fn write(&mut self, path: &str, data: &Dataset) -> container::Result<()> {
                self.0.write(path, data)
            }
            fn remove(&mut self, path: &str) -> container::Result<()> {
                self.0.remove(path)
            }
            fn rename(&mut self, from: &str, to: &str) -> container::Result<()> {
                self.0.rename(from, to)
            }
        }

        let base = fixtures::experiment();
        let layout = ChannelGroupLayout::new("0");
        let kwik = base
            .container(Side::Kwik)
            .clone()
            .with_dataset(&layout.recording(), vec![0u16, 1]);
        let mut exp = KwikExperiment::from_containers(
            "test",
            NoReads(kwik),
            NoReads(base.container(Side::Kwx).clone()),
        );
        let targets = exp.co_indexed_datasets("0").unwrap();

        let result = rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP);
        assert!(matches!(result, Err(RewriteError::LengthMismatch { rows: 2, .. })));
    }

    #[test]
    fn test_length_mismatch_writes_nothing() {
        let mut exp = fixtures::experiment();
        let layout = ChannelGroupLayout::new("0");
        exp.container_mut(Side::Kwik)
            .write(&layout.recording(), &Dataset::from(vec![0u16, 1]))
            .unwrap();
        let targets = exp.co_indexed_datasets("0").unwrap();

        let result = rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP);

        match result {
            Err(RewriteError::LengthMismatch { path, rows, expected }) => {
                assert_eq!(path, layout.recording());
                assert_eq!(rows, 2);
                assert_eq!(expected, 5);
            }
            other => panic!("expected LengthMismatch, got {:?}", other),
        }
        assert_eq!(exp.n_spikes("0").unwrap(), 5);
    }

    #[test]
    fn test_staging_failure_rolls_back() {
        let base = fixtures::experiment();
        let layout = ChannelGroupLayout::new("0");
        let mut kwik = Faulty::wrap(base.container(Side::Kwik));
        kwik.write_marker = "clusters/original";
        let kwx = Faulty::wrap(base.container(Side::Kwx));
        let mut exp = faulty_experiment(kwik, kwx);
        let targets = exp.co_indexed_datasets("0").unwrap();

        let result = rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP);

        assert!(matches!(result, Err(RewriteError::Store(_))));
        for target in &targets {
            assert_eq!(exp.read(target).unwrap().rows(), 5);
            let staged = staging_path(&target.path, DEFAULT_STAGING_GROUP);
            assert!(!exp.container(target.side).exists(&staged), "{}", staged);
        }
        assert!(!exp.container(Side::Kwik).exists(DEFAULT_STAGING_GROUP));
        assert_eq!(
            exp.read(&DatasetRef::kwik(layout.time_samples())).unwrap(),
            Dataset::from(vec![0u64, 2, 4, 100, 300])
        );
    }

    #[test]
    fn test_missing_target_is_store_error() {
        let mut exp = fixtures::experiment();
        let targets = vec![DatasetRef::kwik("/channel_groups/0/spikes/absent")];
        let result = rewrite_rows(&mut exp, &targets, &KEEP, DEFAULT_STAGING_GROUP);
        assert!(matches!(
            result,
            Err(RewriteError::Store(StoreError::NotFound { .. }))
        ));
    }
}
