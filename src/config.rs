use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Upper bound on buckets per key; beyond it the bucket table only grows.
pub const MAX_BUCKET_RATIO: f64 = 64.0;

/// Settings for [`ChdBuilder`](crate::ChdBuilder).
///
/// Serializable so a build can be described in a JSON file and reproduced.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChdBuildConfig {
    /// Seed for the random displacement generator; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Buckets allocated per key.
    pub bucket_ratio: f64,
    /// Fresh displacement values tried per bucket before giving up.
    pub max_attempts: u64,
}

impl Default for ChdBuildConfig {
    fn default() -> Self {
        ChdBuildConfig {
            seed: None,
            bucket_ratio: 0.5,
            max_attempts: 10_000_000,
        }
    }
}

impl ChdBuildConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ChdBuildConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> std::result::Result<(), BuildError> {
        if !(self.bucket_ratio > 0.0 && self.bucket_ratio <= MAX_BUCKET_RATIO) {
            return Err(BuildError::InvalidConfig(format!(
                "bucket_ratio must be in (0, {MAX_BUCKET_RATIO}], got {}",
                self.bucket_ratio
            )));
        }
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Bucket count for `n` keys, never less than one.
    pub(crate) fn bucket_count(&self, n: usize) -> usize {
        ((n as f64 * self.bucket_ratio) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChdError;

    #[test]
    fn test_default_config() {
        let config = ChdBuildConfig::default();
        assert_eq!(config.seed, None);
        assert_eq!(config.bucket_count(0), 1);
        assert_eq!(config.bucket_count(1), 1);
        assert_eq!(config.bucket_count(7), 3);
        assert_eq!(config.bucket_count(1000), 500);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json() {
        let config = ChdBuildConfig::from_json(r#"{ "seed": 42 }"#).unwrap();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.bucket_ratio, 0.5);

        let config =
            ChdBuildConfig::from_json(r#"{ "bucket_ratio": 1.0, "max_attempts": 5 }"#).unwrap();
        assert_eq!(config.bucket_count(10), 10);
        assert_eq!(config.max_attempts, 5);

        let err = ChdBuildConfig::from_json(r#"{ "bucket_ratio": 0 }"#).unwrap_err();
        assert!(matches!(err, ChdError::Build(BuildError::InvalidConfig(_))));

        let err = ChdBuildConfig::from_json(r#"{ "bucket_ratio": 1e30 }"#).unwrap_err();
        assert!(matches!(err, ChdError::Build(BuildError::InvalidConfig(_))));

        let config = ChdBuildConfig::from_json(r#"{ "bucket_ratio": 64 }"#).unwrap();
        assert_eq!(config.bucket_count(3), 192);

        let err = ChdBuildConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ChdError::Config(_)));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.json");
        let config = ChdBuildConfig {
            seed: Some(7),
            bucket_ratio: 0.25,
            max_attempts: 100,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(ChdBuildConfig::load(&path).unwrap(), config);
    }
}
