//! Configuration for the maintenance engine.
//!
//! Loads from a TOML file; every tunable has a default so a file only needs
//! the paths.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Directory owning the live database, staging area and restart marker
    pub data_dir: PathBuf,

    /// Live database file
    pub database_path: PathBuf,

    /// Directory holding backup archives
    pub backup_dir: PathBuf,

    /// First segment of generated archive names
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    #[serde(default)]
    pub limits: MaintenanceLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceLimits {
    /// Bounded wait for the exclusive gate
    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,

    /// Bounded wait for sync leases to drain
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,

    /// Largest accepted `info` manifest entry
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: u64,

    /// Largest accepted database entry, declared or streamed
    #[serde(default = "default_max_database_bytes")]
    pub max_database_bytes: u64,

    /// Largest accepted uploaded archive
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

// Default values
fn default_archive_prefix() -> String {
    "backup".to_string()
}

fn default_gate_timeout_ms() -> u64 {
    2_000
}

fn default_drain_timeout_secs() -> u64 {
    120
}

fn default_drain_poll_interval_ms() -> u64 {
    100
}

fn default_max_manifest_bytes() -> u64 {
    64 * 1024
}

fn default_max_database_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_max_upload_bytes() -> u64 {
    default_max_database_bytes() + 16 * 1024 * 1024
}

impl Default for MaintenanceLimits {
    fn default() -> Self {
        Self {
            gate_timeout_ms: default_gate_timeout_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
            max_manifest_bytes: default_max_manifest_bytes(),
            max_database_bytes: default_max_database_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl MaintenanceLimits {
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms.max(1))
    }
}

impl MaintenanceConfig {
    /// Configuration rooted at `data_dir` with the database at
    /// `{data_dir}/{database_file}` and archives in `{data_dir}/backups`.
    pub fn new(data_dir: impl Into<PathBuf>, database_file: &str) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join(database_file),
            backup_dir: data_dir.join("backups"),
            data_dir,
            archive_prefix: default_archive_prefix(),
            limits: MaintenanceLimits::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MaintenanceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// File name of the live database, used as the archive's database entry.
    pub fn database_file_name(&self) -> String {
        self.database_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database.db".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_minimal_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
data_dir = "/var/lib/dashboard"
database_path = "/var/lib/dashboard/dashboard.db"
backup_dir = "/var/lib/dashboard/backups"
"#
        )?;

        let config = MaintenanceConfig::from_file(file.path())?;
        assert_eq!(config.archive_prefix, "backup");
        assert_eq!(config.limits.gate_timeout(), Duration::from_secs(2));
        assert_eq!(config.limits.drain_timeout(), Duration::from_secs(120));
        assert_eq!(config.limits.max_manifest_bytes, 64 * 1024);
        assert_eq!(config.database_file_name(), "dashboard.db");
        Ok(())
    }

    #[test]
    fn test_limits_override() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
data_dir = "/data"
database_path = "/data/app.db"
backup_dir = "/data/backups"
archive_prefix = "dashboard"

[limits]
drain_timeout_secs = 5
max_database_bytes = 1048576
"#
        )?;

        let config = MaintenanceConfig::from_file(file.path())?;
        assert_eq!(config.archive_prefix, "dashboard");
        assert_eq!(config.limits.drain_timeout_secs, 5);
        assert_eq!(config.limits.max_database_bytes, 1_048_576);
        assert_eq!(config.limits.gate_timeout_ms, 2_000);
        Ok(())
    }
}
