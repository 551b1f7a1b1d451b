//! Daemon and platform configuration.
//!
//! Loaded from YAML (or JSON, chosen by file extension). Every field has a
//! default so an empty file is a valid configuration.

use crate::error::{FibSyncError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Chip capabilities that change how entries are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Program /32 and /128 routes as host table rows instead of LPM rows.
    #[serde(default = "default_host_table_for_host_routes")]
    pub host_table_for_host_routes: bool,
}

fn default_host_table_for_host_routes() -> bool {
    true
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host_table_for_host_routes: default_host_table_for_host_routes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibSyncConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Start by reconciling against hardware state from a previous run.
    #[serde(default)]
    pub warm_boot: bool,

    /// JSON dump of the hardware tables at the time of the restart.
    #[serde(default)]
    pub warm_boot_snapshot: Option<PathBuf>,
}

impl FibSyncConfig {
    /// Loads a configuration file; `.json` is parsed as JSON, anything else
    /// as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config: Self = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                FibSyncError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                FibSyncError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.warm_boot_snapshot.is_some() && !self.warm_boot {
            return Err(FibSyncError::Config(
                "warm_boot_snapshot is set but warm_boot is disabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FibSyncConfig::default();
        assert!(config.platform.host_table_for_host_routes);
        assert!(!config.warm_boot);
        assert_eq!(config.warm_boot_snapshot, None);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "platform:\n  host_table_for_host_routes: false\nwarm_boot: true\nwarm_boot_snapshot: /var/run/fib.json"
        )
        .unwrap();

        let config = FibSyncConfig::load(file.path()).unwrap();
        assert_eq!(
            config,
            FibSyncConfig {
                platform: PlatformConfig {
                    host_table_for_host_routes: false
                },
                warm_boot: true,
                warm_boot_snapshot: Some(PathBuf::from("/var/run/fib.json")),
            }
        );
    }

    #[test]
    fn test_load_json_partial() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"warm_boot": true}}"#).unwrap();

        let config = FibSyncConfig::load(file.path()).unwrap();
        assert!(config.warm_boot);
        assert!(config.platform.host_table_for_host_routes);
    }

    #[test]
    fn test_snapshot_without_warm_boot_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "warm_boot_snapshot: /tmp/x.json").unwrap();

        let err = FibSyncConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, FibSyncError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = FibSyncConfig::load("/nonexistent/fibsync.yaml").unwrap_err();
        assert!(matches!(err, FibSyncError::Io(_)));
    }
}
