//! The `info.json` entry describing a backup archive.
//!
//! Trusted only after [`validate_for_restore`](super::validator::validate_for_restore)
//! has checked it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Newest archive layout this build can read and the one it writes.
pub const CURRENT_FORMAT_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Manual,
    PreRestore,
    Uploaded,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::PreRestore => "pre-restore",
            BackupKind::Uploaded => "uploaded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(BackupKind::Manual),
            "pre-restore" => Some(BackupKind::PreRestore),
            "uploaded" => Some(BackupKind::Uploaded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub app_version: String,
    pub backup_format_version: i64,
    #[serde(default)]
    pub database_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub backup_kind: BackupKind,
    /// Informational only; the restore path never trusts it.
    #[serde(default)]
    pub database_size: Option<u64>,
}

impl BackupManifest {
    pub fn new(app_version: &str, kind: BackupKind, database_sha256: String, database_size: u64) -> Self {
        Self {
            app_version: app_version.to_string(),
            backup_format_version: CURRENT_FORMAT_VERSION,
            database_sha256: Some(database_sha256),
            created_at: Utc::now(),
            backup_kind: kind,
            database_size: Some(database_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_shape() {
        let manifest = BackupManifest::new("2.4.1", BackupKind::PreRestore, "ab".repeat(32), 4096);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["appVersion"], "2.4.1");
        assert_eq!(json["backupFormatVersion"], CURRENT_FORMAT_VERSION);
        assert_eq!(json["backupKind"], "pre-restore");
        assert_eq!(json["databaseSize"], 4096);
    }

    #[test]
    fn test_manifest_without_checksum_still_parses() {
        let raw = r#"{"appVersion":"1.0.0","backupFormatVersion":1,"createdAt":"2026-01-01T00:00:00Z","backupKind":"manual"}"#;
        let manifest: BackupManifest = serde_json::from_str(raw).unwrap();
        assert!(manifest.database_sha256.is_none());
        assert_eq!(manifest.backup_kind, BackupKind::Manual);
    }

    #[test]
    fn test_kind_round_trips_through_names() {
        for kind in [BackupKind::Manual, BackupKind::PreRestore, BackupKind::Uploaded] {
            assert_eq!(BackupKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackupKind::parse("nightly"), None);
    }
}
