use crate::decode::AlleleTruncation;
use crate::types::FeatureSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Run settings. Every key is optional in the TOML file; missing keys take the
/// defaults below and unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// REF/ALT literals longer than this are truncated. Zero disables truncation.
    pub max_allele_len: usize,
    pub geno_probs: bool,
    pub haplotypes: bool,
    /// Merged records between progress callbacks.
    pub progress_interval: u64,
    pub rename_duplicate_samples: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_allele_len: 1024,
            geno_probs: true,
            haplotypes: true,
            progress_interval: 1000,
            rename_duplicate_samples: true,
        }
    }
}

impl MergeConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn allele_truncation(&self) -> AlleleTruncation {
        AlleleTruncation::from_max_len(self.max_allele_len)
    }

    pub fn requested_features(&self) -> FeatureSet {
        FeatureSet {
            haplotypes: self.haplotypes,
            geno_probs: self.geno_probs,
        }
    }
}
