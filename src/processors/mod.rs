//! Data processing modules.

pub mod clusters;
pub mod isi_clean;
pub mod klusters;
pub mod overlap;

// Re-export key types for convenience
pub use clusters::{add_clustering, import_spike_clusters, ClusterImportError};
pub use isi_clean::{clean_channel_group, clean_experiment, GroupReport, IsiCleanError, IsiCleanParams};
pub use klusters::{export_klusters, KlustersError, KlustersExport};
pub use overlap::{
    filter_overlaps, NoProgress, OverlapError, OverlapParams, OverlapResult, Progress,
    ProgressSink, TieBreak,
};
