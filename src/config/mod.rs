//! Configuration types for the KWIK tools.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::rewrite::DEFAULT_STAGING_GROUP;
use crate::processors::overlap::TieBreak;

/// Configuration for overlapping-spike removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsiCleanConfig {
    /// Discard a random member of each overlapping pair; when false the
    /// first spike of the pair is dropped
    #[serde(default = "default_random_discard")]
    pub random_discard: bool,

    /// Seed for the random tie-break; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Root group for filtered copies staged before commit
    #[serde(default = "default_staging_group")]
    pub staging_group: String,
}

fn default_random_discard() -> bool {
    true
}

fn default_staging_group() -> String {
    DEFAULT_STAGING_GROUP.to_string()
}

impl IsiCleanConfig {
    /// Tie-break implied by `random_discard`.
    pub fn tie_break(&self) -> TieBreak {
        TieBreak::from_rand_disc(self.random_discard)
    }
}

impl Default for IsiCleanConfig {
    fn default() -> Self {
        Self {
            random_discard: default_random_discard(),
            seed: None,
            staging_group: default_staging_group(),
        }
    }
}

/// Configuration for KlustaKwik export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlustersConfig {
    /// Magnitude that the largest floating-point feature is scaled to
    #[serde(default = "default_feature_scale")]
    pub feature_scale: i16,

    /// Decimals written per mask value
    #[serde(default = "default_mask_precision")]
    pub mask_precision: usize,
}

fn default_feature_scale() -> i16 {
    i16::MAX
}

fn default_mask_precision() -> usize {
    6
}

impl Default for KlustersConfig {
    fn default() -> Self {
        Self {
            feature_scale: default_feature_scale(),
            mask_precision: default_mask_precision(),
        }
    }
}

/// Top-level configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub isi_clean: IsiCleanConfig,

    #[serde(default)]
    pub klusters: KlustersConfig,
}

impl ToolsConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolsConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
