//! Backup archive container: a zip holding one database snapshot, an `info.json`
//! manifest and a redacted `config.json` settings export.

pub mod manifest;
pub mod naming;
pub mod validator;
pub mod writer;

pub use manifest::{BackupKind, BackupManifest, CURRENT_FORMAT_VERSION};
pub use naming::{archive_name, parse_archive_name, resolve_archive_path, validate_archive_name};
pub use validator::{open_archive, validate_for_restore, ArchiveDetails, ArchiveLimits, ValidatedArchive};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const INFO_ENTRY: &str = "info.json";
pub const CONFIG_ENTRY: &str = "config.json";
pub const DATABASE_SUFFIX: &str = ".db";

/// Listing entry for an archive in the backup directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDescriptor {
    pub name: String,
    pub kind: BackupKind,
    pub app_version: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}
