//! The maintenance operations offered to the web layer.
//!
//! [`BackupStore`] does the blocking file work. [`BackupService`] wraps every
//! mutating call in the restart-gate check and an exclusive coordinator run,
//! and moves the work onto the blocking pool.

use crate::archive::manifest::{BackupKind, BackupManifest};
use crate::archive::writer::{create_archive_file, ArchiveContents};
use crate::archive::{
    open_archive, parse_archive_name, resolve_archive_path, validate_archive_name, validate_for_restore,
    ArchiveDescriptor, ArchiveLimits, DATABASE_SUFFIX,
};
use crate::config::MaintenanceConfig;
use crate::coordinator::{CoordinatorTimeouts, OperationCoordinator, OperationKind, OperationState, SyncLease};
use crate::credentials::{CredentialNormalizer, CredentialRestoreReport, SecretProtector};
use crate::restart_gate::RestartGate;
use crate::settings::{config_document, SettingsExporter};
use crate::snapshot::SnapshotEngine;
use crate::utils::fs::sha256_file;
use crate::utils::{EngineError, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const UPLOAD_FILE: &str = "upload.zip";

pub struct BackupStore {
    config: MaintenanceConfig,
    snapshots: SnapshotEngine,
    normalizer: CredentialNormalizer,
    settings: Arc<dyn SettingsExporter>,
}

impl BackupStore {
    pub fn new(
        config: MaintenanceConfig,
        snapshots: SnapshotEngine,
        normalizer: CredentialNormalizer,
        settings: Arc<dyn SettingsExporter>,
    ) -> Self {
        Self {
            config,
            snapshots,
            normalizer,
            settings,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    fn limits(&self) -> ArchiveLimits {
        ArchiveLimits::from(&self.config.limits)
    }

    /// Archive entry name for the database; always carries the `.db` suffix.
    fn database_entry_name(&self) -> String {
        let name = self.config.database_file_name();
        if name.to_ascii_lowercase().ends_with(DATABASE_SUFFIX) {
            name
        } else {
            format!("{name}{DATABASE_SUFFIX}")
        }
    }

    /// Snapshot the live database and package it as a new archive.
    pub fn create_archive(&self, kind: BackupKind, app_version: &str) -> Result<ArchiveDescriptor> {
        fs::create_dir_all(&self.config.backup_dir)?;
        let staging = self.snapshots.staging_dir()?;
        let entry = self.database_entry_name();
        let snapshot = staging.path().join(&entry);

        let method = self.snapshots.create_snapshot(&snapshot)?;
        let sha256 = sha256_file(&snapshot)?;
        let size = fs::metadata(&snapshot)?.len();
        let manifest = BackupManifest::new(app_version, kind, sha256, size);
        let config = config_document(self.settings.as_ref())?;

        let archive = create_archive_file(
            &self.config.backup_dir,
            &self.config.archive_prefix,
            kind,
            app_version,
        )?;
        let name = archive.name.clone();
        let path = archive.write(&ArchiveContents {
            database_entry: &entry,
            database_file: &snapshot,
            manifest: &manifest,
            config: &config,
        })?;

        info!(
            archive = %name,
            kind = kind.as_str(),
            method = method.as_str(),
            database_bytes = size,
            "Backup archive created"
        );
        self.describe(&name, &path)
    }

    fn describe(&self, name: &str, path: &Path) -> Result<ArchiveDescriptor> {
        let parsed = parse_archive_name(&self.config.archive_prefix, name)
            .ok_or_else(|| EngineError::InvalidName(format!("{name:?}: not a backup archive name")))?;
        Ok(ArchiveDescriptor {
            name: name.to_string(),
            kind: parsed.kind,
            app_version: parsed.app_version,
            size_bytes: fs::metadata(path)?.len(),
            created_at: parsed.created_at,
        })
    }

    /// Archives in the backup directory, newest first. Foreign files are ignored.
    pub fn list(&self) -> Result<Vec<ArchiveDescriptor>> {
        let entries = match fs::read_dir(&self.config.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(parsed) = parse_archive_name(&self.config.archive_prefix, &name) else {
                continue;
            };
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            archives.push(ArchiveDescriptor {
                name,
                kind: parsed.kind,
                app_version: parsed.app_version,
                size_bytes: meta.len(),
                created_at: parsed.created_at,
            });
        }

        archives.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(archives)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = resolve_archive_path(&self.config.backup_dir, name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(archive = name, "Backup archive deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(format!("Backup not found: {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every archive; returns how many were removed.
    pub fn purge(&self) -> Result<usize> {
        let archives = self.list()?;
        let mut removed = 0;
        for archive in &archives {
            match fs::remove_file(self.config.backup_dir.join(&archive.name)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(removed, "Backup archives purged");
        Ok(removed)
    }

    /// Accept an uploaded archive. It is only kept if it would pass restore
    /// validation against `app_version`.
    pub fn import(&self, source: &mut dyn Read, app_version: &str) -> Result<ArchiveDescriptor> {
        fs::create_dir_all(&self.config.backup_dir)?;
        let staging = self.snapshots.staging_dir()?;
        let staged = staging.path().join(UPLOAD_FILE);
        let received = copy_limited(source, &staged, self.config.limits.max_upload_bytes)?;

        let mut archive = open_archive(&staged)?;
        let validated = validate_for_restore(&mut archive, app_version, &self.limits())?;
        drop(archive);

        let source_version = validated.details.manifest.app_version.clone();
        let target = create_archive_file(
            &self.config.backup_dir,
            &self.config.archive_prefix,
            BackupKind::Uploaded,
            &source_version,
        )?;
        let name = target.name.clone();
        let path = target.fill_from(&staged)?;

        info!(archive = %name, bytes = received, source_version = %source_version, "Uploaded backup accepted");
        self.describe(&name, &path)
    }

    /// Restore `name` over the live database. Uploaded archives are consumed.
    pub fn restore(&self, name: &str, app_version: &str) -> Result<CredentialRestoreReport> {
        let path = resolve_archive_path(&self.config.backup_dir, name)?;
        let kind = parse_archive_name(&self.config.archive_prefix, name).map(|p| p.kind);

        let mut archive = open_archive(&path)?;
        let validated = validate_for_restore(&mut archive, app_version, &self.limits())?;
        let report = self.snapshots.restore_from(&mut archive, &validated, &self.normalizer, || {
            self.pre_restore_backup(app_version)
        })?;
        drop(archive);

        if kind == Some(BackupKind::Uploaded) {
            match fs::remove_file(&path) {
                Ok(()) => info!(archive = name, "Consumed uploaded backup"),
                Err(e) => warn!(archive = name, error = %e, "Failed to remove restored upload"),
            }
        }
        Ok(report)
    }

    fn pre_restore_backup(&self, app_version: &str) -> Result<()> {
        if !self.snapshots.live_database_exists() {
            info!("No live database yet, skipping pre-restore backup");
            return Ok(());
        }
        let safety = self.create_archive(BackupKind::PreRestore, app_version)?;
        info!(archive = %safety.name, "Pre-restore safety backup created");
        Ok(())
    }
}

/// Copy at most `max` bytes from `source` into a new file at `dest`.
fn copy_limited(source: &mut dyn Read, dest: &Path, max: u64) -> Result<u64> {
    let mut out = File::create(dest)?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = source.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max {
            return Err(EngineError::InvalidArchive(format!("upload exceeds {max} bytes")));
        }
        out.write_all(&buffer[..n])?;
    }
    out.sync_all()?;
    Ok(total)
}

/// Async facade over [`BackupStore`], shared by the HTTP handlers.
pub struct BackupService {
    store: Arc<BackupStore>,
    coordinator: Arc<OperationCoordinator>,
    restart_gate: RestartGate,
    shutdown: CancellationToken,
}

impl BackupService {
    pub fn new(
        config: MaintenanceConfig,
        protector: Arc<dyn SecretProtector>,
        settings: Arc<dyn SettingsExporter>,
    ) -> Self {
        let coordinator = Arc::new(OperationCoordinator::new(CoordinatorTimeouts::from(&config.limits)));
        let restart_gate = RestartGate::new(&config.data_dir);
        let snapshots = SnapshotEngine::new(&config);
        let normalizer = CredentialNormalizer::new(protector);
        let store = BackupStore::new(config, snapshots, normalizer, settings);
        Self::from_parts(store, coordinator, restart_gate)
    }

    pub fn from_parts(store: BackupStore, coordinator: Arc<OperationCoordinator>, restart_gate: RestartGate) -> Self {
        Self {
            store: Arc::new(store),
            coordinator,
            restart_gate,
            shutdown: CancellationToken::new(),
        }
    }

    /// Operations still waiting for sync leases give up once `token` fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn coordinator(&self) -> &Arc<OperationCoordinator> {
        &self.coordinator
    }

    pub fn restart_gate(&self) -> &RestartGate {
        &self.restart_gate
    }

    /// Sync lease for background work. Refused while maintenance runs and
    /// after a restore until the process restarts: pooled connections still
    /// point at the replaced file.
    pub fn try_enter_sync_activity(&self, name: &str) -> Option<SyncLease> {
        if self.restart_gate.is_restart_required() {
            debug!(activity = name, "Sync activity refused until restart");
            return None;
        }
        self.coordinator.try_enter_sync_activity(name)
    }

    pub fn operation_state(&self) -> OperationState {
        self.coordinator.state()
    }

    pub async fn create_backup(&self, app_version: &str) -> Result<ArchiveDescriptor> {
        let version = app_version.to_string();
        self.exclusive(OperationKind::Create, None, move |store| {
            store.create_archive(BackupKind::Manual, &version)
        })
        .await
    }

    pub async fn list_backups(&self) -> Result<Vec<ArchiveDescriptor>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?
    }

    pub async fn delete_backup(&self, name: &str) -> Result<()> {
        self.restart_gate.ensure_not_required()?;
        validate_archive_name(name)?;
        let owned = name.to_string();
        self.exclusive(OperationKind::Delete, Some(name), move |store| store.delete(&owned))
            .await
    }

    pub async fn restore_backup(&self, name: &str, app_version: &str) -> Result<CredentialRestoreReport> {
        self.restart_gate.ensure_not_required()?;
        validate_archive_name(name)?;
        let owned = name.to_string();
        let version = app_version.to_string();
        let gate = self.restart_gate.clone();
        self.exclusive(OperationKind::Restore, Some(name), move |store| {
            let report = store.restore(&owned, &version)?;
            if let Err(e) = gate.mark_required() {
                error!(error = %e, "Restore succeeded but the restart marker could not be written");
                return Err(e);
            }
            Ok(report)
        })
        .await
    }

    pub async fn purge_backups(&self) -> Result<usize> {
        self.exclusive(OperationKind::Purge, None, |store| store.purge()).await
    }

    pub async fn import_backup<R>(&self, mut reader: R, app_version: &str) -> Result<ArchiveDescriptor>
    where
        R: Read + Send + 'static,
    {
        let version = app_version.to_string();
        self.exclusive(OperationKind::Upload, None, move |store| store.import(&mut reader, &version))
            .await
    }

    /// Restart-gate check, then `work` on the blocking pool inside an exclusive
    /// coordinator run. The run is spawned so a dropped caller cannot release
    /// the gate while file work is still in progress.
    async fn exclusive<T, F>(&self, kind: OperationKind, target: Option<&str>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BackupStore) -> Result<T> + Send + 'static,
    {
        self.restart_gate.ensure_not_required()?;

        let coordinator = self.coordinator.clone();
        let store = self.store.clone();
        let gate = self.restart_gate.clone();
        let shutdown = self.shutdown.clone();
        let target = target.map(str::to_string);
        let run = tokio::spawn(async move {
            coordinator
                .run_exclusive_cancellable(kind, target.as_deref(), &shutdown, || async move {
                    tokio::task::spawn_blocking(move || {
                        // A restore may have finished while this call waited for the gate.
                        gate.ensure_not_required()?;
                        work(&store)
                    })
                    .await
                    .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?
                })
                .await
        });
        run.await.map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?
    }
}
