//! Packaging a database snapshot into a new archive file.

use super::manifest::{BackupKind, BackupManifest};
use super::naming::archive_name;
use super::{CONFIG_ENTRY, INFO_ENTRY};
use crate::utils::fs::remove_if_exists;
use crate::utils::{EngineError, Result};
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MAX_NAME_ATTEMPTS: usize = 8;

pub struct ArchiveContents<'a> {
    /// Entry name for the database file (ends in `.db`)
    pub database_entry: &'a str,
    pub database_file: &'a Path,
    pub manifest: &'a BackupManifest,
    pub config: &'a serde_json::Value,
}

/// An archive file that was just created exclusively and is still empty.
pub struct NewArchive {
    pub name: String,
    pub path: PathBuf,
    file: File,
}

/// Create a new, uniquely named archive file in `backup_dir`.
///
/// The first attempt uses the plain timestamped name; on collision a random
/// eight-hex-digit disambiguator is appended.
pub fn create_archive_file(
    backup_dir: &Path,
    prefix: &str,
    kind: BackupKind,
    app_version: &str,
) -> Result<NewArchive> {
    let now = Utc::now();
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let suffix = (attempt > 0).then(|| format!("{:08x}", rand::random::<u32>()));
        let name = archive_name(prefix, kind, app_version, now, suffix.as_deref());
        let path = backup_dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok(NewArchive { name, path, file }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(name = %name, "Archive name taken, retrying with disambiguator");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(EngineError::Internal(anyhow::anyhow!(
        "could not find a free archive name after {MAX_NAME_ATTEMPTS} attempts"
    )))
}

impl NewArchive {
    /// Write every entry and fsync. On failure the partial file is deleted.
    pub fn write(self, contents: &ArchiveContents<'_>) -> Result<PathBuf> {
        let NewArchive { path, file, .. } = self;
        match write_entries(file, contents) {
            Ok(()) => Ok(path),
            Err(e) => {
                discard_partial(&path);
                Err(e)
            }
        }
    }

    /// Fill the archive with an already packaged zip (uploads).
    pub fn fill_from(self, source: &Path) -> Result<PathBuf> {
        let NewArchive { path, mut file, .. } = self;
        let copied = File::open(source)
            .and_then(|mut src| io::copy(&mut src, &mut file))
            .and_then(|_| file.sync_all());
        match copied {
            Ok(()) => Ok(path),
            Err(e) => {
                discard_partial(&path);
                Err(e.into())
            }
        }
    }
}

fn discard_partial(path: &Path) {
    if let Err(cleanup) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %cleanup, "Failed to remove partial archive");
    }
}

fn write_entries(file: File, contents: &ArchiveContents<'_>) -> Result<()> {
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let db_size = std::fs::metadata(contents.database_file)?.len();
    zip.start_file(
        contents.database_entry,
        options.large_file(db_size >= u32::MAX as u64),
    )?;
    let mut db = File::open(contents.database_file)?;
    io::copy(&mut db, &mut zip)?;

    zip.start_file(INFO_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(contents.manifest)?)?;

    zip.start_file(CONFIG_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(contents.config)?)?;

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::validator::{validate_for_restore, ArchiveLimits};
    use crate::utils::fs::sha256_file;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn test_colliding_names_get_disambiguator() -> Result<()> {
        let dir = TempDir::new()?;
        let mut names = std::collections::HashSet::new();
        for _ in 0..5 {
            let new = create_archive_file(dir.path(), "backup", BackupKind::Manual, "1.0.0")?;
            assert!(new.path.exists());
            assert!(names.insert(new.name));
        }
        // Within one second only the first archive gets the plain name.
        assert!(names.iter().any(|n| n.matches('_').count() == 4));
        Ok(())
    }

    #[test]
    fn test_written_archive_validates() -> Result<()> {
        let dir = TempDir::new()?;
        let db = dir.path().join("snap.db");
        std::fs::write(&db, vec![7u8; 2048])?;
        let sha = sha256_file(&db)?;

        let manifest = BackupManifest::new("1.4.0", BackupKind::Manual, sha.clone(), 2048);
        let config = serde_json::json!({ "settings": { "theme": "dark" } });
        let new = create_archive_file(dir.path(), "backup", BackupKind::Manual, "1.4.0")?;
        let path = new.write(&ArchiveContents {
            database_entry: "dashboard.db",
            database_file: &db,
            manifest: &manifest,
            config: &config,
        })?;

        let mut archive = ZipArchive::new(File::open(&path)?)?;
        let validated = validate_for_restore(
            &mut archive,
            "1.4.0",
            &ArchiveLimits {
                max_manifest_bytes: 64 * 1024,
                max_database_bytes: 1 << 20,
            },
        )?;
        assert_eq!(validated.database_entry, "dashboard.db");
        assert_eq!(validated.details.expected_sha256, sha);
        assert_eq!(validated.details.declared_size, 2048);
        Ok(())
    }

    #[test]
    fn test_failed_write_removes_partial_archive() -> Result<()> {
        let dir = TempDir::new()?;
        let manifest = BackupManifest::new("1.0.0", BackupKind::Manual, "0".repeat(64), 0);
        let config = serde_json::json!({});
        let new = create_archive_file(dir.path(), "backup", BackupKind::Manual, "1.0.0")?;
        let path = new.path.clone();

        let missing = dir.path().join("does-not-exist.db");
        let result = new.write(&ArchiveContents {
            database_entry: "dashboard.db",
            database_file: &missing,
            manifest: &manifest,
            config: &config,
        });
        assert!(result.is_err());
        assert!(!path.exists());
        Ok(())
    }
}
