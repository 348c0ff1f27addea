//! Structural validation of an untrusted backup archive.
//!
//! Only the small `info.json` entry is ever decompressed here. Everything else
//! is judged from the central directory.

use super::manifest::{BackupManifest, CURRENT_FORMAT_VERSION};
use super::{DATABASE_SUFFIX, INFO_ENTRY};
use crate::config::MaintenanceLimits;
use crate::utils::{EngineError, Result};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_manifest_bytes: u64,
    pub max_database_bytes: u64,
}

impl From<&MaintenanceLimits> for ArchiveLimits {
    fn from(limits: &MaintenanceLimits) -> Self {
        Self {
            max_manifest_bytes: limits.max_manifest_bytes,
            max_database_bytes: limits.max_database_bytes,
        }
    }
}

/// What the extraction step needs to verify.
#[derive(Debug, Clone)]
pub struct ArchiveDetails {
    pub manifest: BackupManifest,
    /// Lower-case hex.
    pub expected_sha256: String,
    pub declared_size: u64,
}

#[derive(Debug, Clone)]
pub struct ValidatedArchive {
    pub database_entry: String,
    pub details: ArchiveDetails,
}

fn reject(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidArchive(msg.into())
}

/// Open a zip container, classifying a broken container as an invalid archive.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound(format!("Backup archive not found: {}", display_name(path)))
        } else {
            EngineError::Io(e)
        }
    })?;
    ZipArchive::new(file).map_err(|e| reject(format!("not a readable zip archive: {e}")))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn validate_for_restore<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    current_app_version: &str,
    limits: &ArchiveLimits,
) -> Result<ValidatedArchive> {
    let manifest = read_manifest(archive, limits.max_manifest_bytes)?;

    if manifest.backup_format_version <= 0 {
        return Err(reject(format!(
            "unsupported backup format version {}",
            manifest.backup_format_version
        )));
    }
    if manifest.backup_format_version > CURRENT_FORMAT_VERSION {
        return Err(reject(format!(
            "backup format version {} is newer than supported version {}",
            manifest.backup_format_version, CURRENT_FORMAT_VERSION
        )));
    }

    let expected_sha256 = match manifest.database_sha256.as_deref().map(str::trim) {
        Some(sha) if is_sha256_hex(sha) => sha.to_ascii_lowercase(),
        Some(s) if !s.is_empty() => return Err(reject("manifest database checksum is malformed")),
        _ => return Err(reject("manifest has no database checksum")),
    };

    if !is_version_compatible(&manifest.app_version, current_app_version) {
        return Err(reject(format!(
            "backup was created by version {} which is newer than the running version {}",
            manifest.app_version, current_app_version
        )));
    }

    let (database_entry, declared_size) = find_database_entry(archive)?;
    if declared_size == 0 {
        return Err(reject(format!("database entry {database_entry} is empty")));
    }
    if declared_size > limits.max_database_bytes {
        return Err(reject(format!(
            "database entry {database_entry} is {declared_size} bytes, limit is {}",
            limits.max_database_bytes
        )));
    }

    Ok(ValidatedArchive {
        database_entry,
        details: ArchiveDetails {
            manifest,
            expected_sha256,
            declared_size,
        },
    })
}

fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>, max_bytes: u64) -> Result<BackupManifest> {
    let entry = match archive.by_name(INFO_ENTRY) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(reject("archive has no info manifest")),
        Err(e) => return Err(reject(format!("info manifest is unreadable: {e}"))),
    };

    let declared = entry.size();
    if declared == 0 {
        return Err(reject("info manifest is empty"));
    }
    if declared > max_bytes {
        return Err(reject(format!("info manifest is {declared} bytes, limit is {max_bytes}")));
    }

    // The header size is attacker-controlled; count what the stream really yields.
    let mut buf = Vec::with_capacity(declared as usize);
    entry
        .take(max_bytes + 1)
        .read_to_end(&mut buf)
        .map_err(|e| reject(format!("info manifest is unreadable: {e}")))?;
    if buf.len() as u64 > max_bytes {
        return Err(reject(format!("info manifest exceeds {max_bytes} bytes")));
    }

    serde_json::from_slice(&buf).map_err(|e| reject(format!("info manifest is malformed: {e}")))
}

fn find_database_entry<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<(String, u64)> {
    let mut matches = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| reject(format!("archive entry {i} is unreadable: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        if entry.name().to_ascii_lowercase().ends_with(DATABASE_SUFFIX) {
            matches.push((entry.name().to_string(), entry.size()));
        }
    }

    match matches.len() {
        0 => Err(reject("archive contains no database file")),
        1 => Ok(matches.remove(0)),
        _ => {
            let names: Vec<&str> = matches.iter().map(|(n, _)| n.as_str()).collect();
            Err(reject(format!(
                "archive contains more than one database file: {}",
                names.join(", ")
            )))
        }
    }
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Leading numeric component of a version string (`v2.3.1-beta` → 2).
fn major_version(version: &str) -> Option<u64> {
    let v = version.trim();
    let v = v.strip_prefix(['v', 'V']).unwrap_or(v);
    let major = v.split(['.', '-', '+']).next()?;
    major.parse().ok()
}

/// A backup from a newer major version is refused; unparsable versions pass.
pub fn is_version_compatible(backup_version: &str, current_version: &str) -> bool {
    match (major_version(backup_version), major_version(current_version)) {
        (Some(backup), Some(current)) => backup <= current,
        _ => true,
    }
}
