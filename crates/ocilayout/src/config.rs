use std::fs;
use std::path::Path;

use ocilayout_types::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, LayoutResult};

/// Tunables of a [`Layout`](crate::Layout).
///
/// ```toml
/// sync = true
/// algorithm = "sha256"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// `fsync` blobs, the index and their directories before returning.
    pub sync: bool,
    /// Digest algorithm for blobs written without a known descriptor.
    pub algorithm: Algorithm,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sync: true,
            algorithm: Algorithm::Sha256,
        }
    }
}

impl LayoutConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> LayoutResult<Self> {
        toml::from_str(s).map_err(|e| LayoutError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> LayoutResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LayoutError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = LayoutConfig::default();
        assert!(c.sync);
        assert_eq!(c.algorithm, Algorithm::Sha256);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let c = LayoutConfig::from_toml_str("algorithm = \"blake3\"").unwrap();
        assert!(c.sync);
        assert_eq!(c.algorithm, Algorithm::Blake3);

        let c = LayoutConfig::from_toml_str("sync = false").unwrap();
        assert!(!c.sync);
        assert_eq!(c.algorithm, Algorithm::Sha256);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = LayoutConfig::from_toml_str("algorithm = \"md5\"").unwrap_err();
        assert!(matches!(err, LayoutError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        fs::write(&path, "sync = false\nalgorithm = \"sha512\"\n").unwrap();
        let c = LayoutConfig::load(&path).unwrap();
        assert_eq!(
            c,
            LayoutConfig {
                sync: false,
                algorithm: Algorithm::Sha512
            }
        );
        assert!(LayoutConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
