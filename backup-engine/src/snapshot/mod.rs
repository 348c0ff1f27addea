//! Consistent snapshots of the live database and the crash-safe restore path.
//!
//! Restore stages everything in isolation first: extraction, checksum,
//! integrity, credential normalization. The live file is only touched by the
//! final swap, which always leaves a live database in place.

mod replace;
pub mod sqlite;

pub use replace::{FsOps, StdFsOps};
pub use sqlite::integrity_check;

use crate::archive::{ArchiveLimits, ValidatedArchive};
use crate::config::MaintenanceConfig;
use crate::credentials::{CredentialNormalizer, CredentialRestoreReport};
use crate::utils::fs::{remove_if_exists, sha256_file, sync_dir};
use crate::utils::{EngineError, Result};
use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

const STAGED_FILE: &str = "restore.db";
const STAGE_SUFFIX: &str = ".restore-stage";
const ASIDE_SUFFIX: &str = ".restore-aside";
const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMethod {
    OnlineCopy,
    CheckpointCopy,
}

impl SnapshotMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotMethod::OnlineCopy => "online-copy",
            SnapshotMethod::CheckpointCopy => "checkpoint-copy",
        }
    }
}

pub struct SnapshotEngine {
    database_path: PathBuf,
    staging_root: PathBuf,
    limits: ArchiveLimits,
    fs: Arc<dyn FsOps>,
}

impl SnapshotEngine {
    pub fn new(config: &MaintenanceConfig) -> Self {
        Self {
            database_path: config.database_path.clone(),
            staging_root: config.data_dir.clone(),
            limits: ArchiveLimits::from(&config.limits),
            fs: Arc::new(StdFsOps),
        }
    }

    pub fn with_fs_ops(mut self, fs: Arc<dyn FsOps>) -> Self {
        self.fs = fs;
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn live_database_exists(&self) -> bool {
        self.database_path.is_file()
    }

    /// Private scratch directory, removed when the returned handle drops.
    pub fn staging_dir(&self) -> Result<tempfile::TempDir> {
        fs::create_dir_all(&self.staging_root)?;
        Ok(tempfile::Builder::new()
            .prefix(".maintenance-")
            .tempdir_in(&self.staging_root)?)
    }

    /// Write a consistent copy of the live database to `dest`.
    pub fn create_snapshot(&self, dest: &Path) -> Result<SnapshotMethod> {
        if !self.live_database_exists() {
            return Err(EngineError::NotFound(format!(
                "Live database not found: {}",
                self.database_path.display()
            )));
        }

        match sqlite::online_copy(&self.database_path, dest) {
            Ok(()) => {
                debug!(dest = %dest.display(), "Online snapshot complete");
                return Ok(SnapshotMethod::OnlineCopy);
            }
            Err(e) => {
                warn!(error = %e, "Online snapshot failed, falling back to checkpoint and file copy");
                remove_if_exists(dest)?;
            }
        }

        sqlite::checkpoint_copy(&self.database_path, dest)?;
        rusqlite::Connection::open(dest)?.execute_batch("PRAGMA journal_mode = DELETE;")?;
        Ok(SnapshotMethod::CheckpointCopy)
    }

    /// Restore the validated database entry of `archive` over the live database.
    ///
    /// `pre_restore` runs after every isolated check passed and before the live
    /// file is touched; it is where the caller takes its safety backup. If it
    /// fails, the restore is abandoned.
    pub fn restore_from<R, F>(
        &self,
        archive: &mut ZipArchive<R>,
        validated: &ValidatedArchive,
        normalizer: &CredentialNormalizer,
        pre_restore: F,
    ) -> Result<CredentialRestoreReport>
    where
        R: Read + Seek,
        F: FnOnce() -> Result<()>,
    {
        self.ensure_no_stranded_original()?;
        let staging = self.staging_dir()?;
        let staged = staging.path().join(STAGED_FILE);

        self.extract_entry(archive, &validated.database_entry, &staged)?;

        let actual = sha256_file(&staged)?;
        let expected = &validated.details.expected_sha256;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(EngineError::InvalidArchive(format!(
                "database checksum mismatch: manifest says {expected}, entry hashes to {actual}"
            )));
        }

        integrity_check(&staged).map_err(|e| {
            EngineError::InvalidArchive(format!("extracted database failed integrity check: {e}"))
        })?;

        let report = normalizer.normalize(&staged)?;
        integrity_check(&staged)?;

        pre_restore()?;

        self.replace_live(&staged)?;
        info!(
            entry = %validated.database_entry,
            reencrypted = report.reencrypted_count,
            cleared = report.cleared_undecryptable_count,
            "Live database replaced from backup"
        );
        Ok(report)
    }

    /// Streamed extraction with byte accounting; the entry header's size is
    /// not trusted.
    fn extract_entry<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        entry_name: &str,
        dest: &Path,
    ) -> Result<()> {
        let max = self.limits.max_database_bytes;
        let mut entry = archive
            .by_name(entry_name)
            .map_err(|e| EngineError::InvalidArchive(format!("database entry {entry_name} is unreadable: {e}")))?;

        let mut out = File::create(dest)?;
        let mut buffer = vec![0u8; COPY_BUFFER];
        let mut written: u64 = 0;
        loop {
            let n = entry
                .read(&mut buffer)
                .map_err(|e| EngineError::InvalidArchive(format!("database entry {entry_name} is corrupt: {e}")))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > max {
                return Err(EngineError::InvalidArchive(format!(
                    "database entry {entry_name} expands past {max} bytes"
                )));
            }
            out.write_all(&buffer[..n])?;
        }
        out.sync_all()?;
        debug!(entry = entry_name, bytes = written, "Extracted database entry");
        Ok(())
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.database_path.as_os_str().to_owned();
        name.push(suffix);
        name.into()
    }

    /// A leftover aside file means an earlier swap and its rollback both
    /// failed. It may be the only copy of the original database.
    fn ensure_no_stranded_original(&self) -> Result<()> {
        let aside = self.sibling(ASIDE_SUFFIX);
        if aside.exists() {
            let name = aside
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            error!(path = %aside.display(), "Database from an earlier failed restore is still present");
            return Err(EngineError::Conflict(format!(
                "{name} in the data directory holds the database from an earlier failed restore; \
                 move it out of the way before restoring again"
            )));
        }
        Ok(())
    }

    fn replace_live(&self, staged: &Path) -> Result<()> {
        let live = self.database_path.as_path();
        let stage = self.sibling(STAGE_SUFFIX);
        let aside = self.sibling(ASIDE_SUFFIX);

        self.ensure_no_stranded_original()?;
        remove_if_exists(&stage)?;
        fs::copy(staged, &stage)?;
        File::open(&stage)?.sync_all()?;
        if let Err(e) = integrity_check(&stage) {
            let _ = remove_if_exists(&stage);
            return Err(e);
        }

        if live.exists() {
            if let Err(e) = sqlite::checkpoint(live) {
                warn!(error = %e, "Checkpoint of live database before swap failed");
            }
        }

        match self.fs.atomic_replace(&stage, live, &aside) {
            Ok(()) => debug!("Live database swapped atomically"),
            Err(e) if replace::is_recoverable(&e) => {
                warn!(error = %e, "Atomic replace unavailable, using move-based swap");
                let _ = remove_if_exists(&aside);
                self.move_swap(&stage, live, &aside)?;
            }
            Err(e) => {
                let _ = remove_if_exists(&stage);
                return Err(e.into());
            }
        }

        if let Err(e) = remove_if_exists(&aside) {
            warn!(path = %aside.display(), error = %e, "Failed to remove previous database");
        }
        for side in replace::side_files(live) {
            if let Err(e) = remove_if_exists(&side) {
                warn!(path = %side.display(), error = %e, "Failed to remove stale database side file");
            }
        }
        if let Some(dir) = live.parent() {
            sync_dir(dir);
        }
        Ok(())
    }

    /// Move live aside, move stage in; on failure move the original back.
    fn move_swap(&self, stage: &Path, live: &Path, aside: &Path) -> Result<()> {
        let had_live = live.exists();
        if had_live {
            if let Err(e) = self.fs.rename(live, aside) {
                let _ = remove_if_exists(stage);
                return Err(e.into());
            }
        }

        let Err(e) = self.fs.rename(stage, live) else {
            return Ok(());
        };
        let _ = remove_if_exists(stage);
        if !had_live {
            return Err(e.into());
        }

        match self.fs.rename(aside, live) {
            Ok(()) => {
                warn!(error = %e, "Database swap failed; original database restored");
                Err(e.into())
            }
            Err(rollback) => {
                error!(
                    fatal = true,
                    live = %live.display(),
                    aside = %aside.display(),
                    swap_error = %e,
                    rollback_error = %rollback,
                    "Database swap and rollback both failed; live database is missing"
                );
                Err(EngineError::Internal(anyhow::anyhow!(
                    "database swap failed ({e}) and rollback failed ({rollback}); original database is at {}",
                    aside.display()
                )))
            }
        }
    }
}
