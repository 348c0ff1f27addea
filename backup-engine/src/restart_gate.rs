//! Durable "restart required" marker.
//!
//! Written after a successful restore. While it exists every maintenance
//! entry point refuses to run: the process's key material may no longer match
//! the credentials that were just rewritten in the restored database.

use crate::utils::fs::sync_dir;
use crate::utils::{EngineError, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RESTART_MARKER_FILE: &str = "restart-required";

pub const RESTART_REQUIRED_MESSAGE: &str =
    "A backup was restored. Restart the application before running further maintenance operations.";

#[derive(Debug, Clone)]
pub struct RestartGate {
    marker: PathBuf,
}

impl RestartGate {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            marker: data_dir.join(RESTART_MARKER_FILE),
        }
    }

    pub fn is_restart_required(&self) -> bool {
        self.marker.exists()
    }

    /// Fail with the operator-facing conflict if a restart is pending.
    pub fn ensure_not_required(&self) -> Result<()> {
        if self.is_restart_required() {
            return Err(EngineError::Conflict(RESTART_REQUIRED_MESSAGE.to_string()));
        }
        Ok(())
    }

    pub fn mark_required(&self) -> Result<()> {
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.marker)?;
        writeln!(file, "{}", chrono::Utc::now().to_rfc3339())?;
        file.sync_all()?;
        if let Some(parent) = self.marker.parent() {
            sync_dir(parent);
        }
        warn!(marker = %self.marker.display(), "Restart required before further maintenance");
        Ok(())
    }

    /// Called once during process initialization.
    pub fn clear_on_startup(&self) -> Result<()> {
        match fs::remove_file(&self.marker) {
            Ok(()) => {
                info!("Cleared restart-required marker from previous restore");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
