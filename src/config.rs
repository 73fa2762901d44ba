use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use crate::providers::openai::OracleConfig;

/// Knobs for question synthesis. Every field has a default so a partial YAML
/// file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub seed: u64,
    /// Fraction of zero/one-difference counting samples that survive.
    pub low_difference_keep_ratio: f64,
    /// Fraction of single-object open enumeration answers that survive.
    pub single_label_keep_ratio: f64,
    /// Probability of asking for the first (rather than last) lego operation.
    pub lego_first_weight: f64,
    pub bookshelf_surface: String,
    pub beads_surface: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            low_difference_keep_ratio: 0.3,
            single_label_keep_ratio: 0.3,
            lego_first_weight: 0.25,
            bookshelf_surface: "dark blue bed".to_string(),
            beads_surface: "red bed".to_string(),
        }
    }
}

impl SynthesisConfig {
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_yaml::from_str(&raw).map_err(|source| StoreError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "seed: 7\nbeads_surface: green mat").expect("write");

        let config = SynthesisConfig::load_yaml(file.path()).expect("load");
        assert_eq!(config.seed, 7);
        assert_eq!(config.beads_surface, "green mat");
        assert_eq!(config.bookshelf_surface, "dark blue bed");
        assert!((config.low_difference_keep_ratio - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_yaml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "seed: [not a number").expect("write");

        let err = SynthesisConfig::load_yaml(file.path()).unwrap_err();
        assert!(matches!(err, StoreError::Yaml { .. }));
    }
}
