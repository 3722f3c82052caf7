//! Core data types and I/O operations.

pub mod container;
pub mod dataset;
#[cfg(feature = "hdf5")]
pub mod hdf5_store;
pub mod kwik;
pub mod loaders;
pub mod rewrite;
pub mod writers;

pub use container::{Container, MemoryContainer, StoreError};
pub use dataset::{Dataset, DatasetError};
pub use kwik::{ChannelGroupLayout, DatasetRef, KwikExperiment, Side};
pub use rewrite::{rewrite_rows, RewriteError, RewriteSummary};
pub use writers::{write_fet, write_fmask, WriteError};
