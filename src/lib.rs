//! Post-processing tools for KWIK/KWX spike-sorting experiments.
//!
//! This crate provides tools for:
//! - Removing overlapping duplicate spikes (ISI cleaning) in place
//! - Adding externally computed clusterings to an experiment
//! - Exporting features and masks to the KlustaKwik text formats
//!
//! On-disk HDF5 access is behind the `hdf5` feature; everything else works on
//! any [`core::container::Container`].
//!
//! # Example
//!
//! ```no_run
//! use kwik_tools::core::kwik::open_experiment;
//! use kwik_tools::processors::isi_clean::{clean_experiment, IsiCleanParams};
//! use kwik_tools::processors::overlap::{NoProgress, OverlapParams, TieBreak};
//! use rand::SeedableRng;
//!
//! let mut exp = open_experiment("session.kwik".as_ref()).unwrap();
//! let params = IsiCleanParams::new(OverlapParams::new(10, 0.5, TieBreak::Random));
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let reports = clean_experiment(&mut exp, &params, &mut rng, &mut NoProgress).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{IsiCleanConfig, KlustersConfig, ToolsConfig};
pub use crate::core::kwik::{open_experiment, KwikExperiment};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
