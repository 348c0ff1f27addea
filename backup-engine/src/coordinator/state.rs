//! Published state of the maintenance coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Exclusive operation currently (or last) holding the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Idle,
    Create,
    Restore,
    Delete,
    Purge,
    Upload,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Idle => "idle",
            OperationKind::Create => "create",
            OperationKind::Restore => "restore",
            OperationKind::Delete => "delete",
            OperationKind::Purge => "purge",
            OperationKind::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationPhase {
    Idle,
    WaitingSync,
    Running,
}

/// Snapshot of the coordinator. Always handed out by value.
///
/// `is_busy` mirrors `phase != Idle`; `sync_blocked` is set for the whole
/// lifetime of an exclusive operation, from draining until completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    pub is_busy: bool,
    pub operation: OperationKind,
    pub phase: OperationPhase,
    pub target_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_success: Option<bool>,
    pub last_error: Option<String>,
    pub active_sync_leases: usize,
    pub sync_blocked: bool,
}

impl Default for OperationState {
    fn default() -> Self {
        Self {
            is_busy: false,
            operation: OperationKind::Idle,
            phase: OperationPhase::Idle,
            target_name: None,
            started_at: None,
            last_completed_at: None,
            last_success: None,
            last_error: None,
            active_sync_leases: 0,
            sync_blocked: false,
        }
    }
}

impl OperationState {
    pub(crate) fn begin(&mut self, kind: OperationKind, target: Option<&str>) {
        self.operation = kind;
        self.target_name = target.map(str::to_string);
        self.started_at = Some(Utc::now());
        self.sync_blocked = true;
        self.set_phase(OperationPhase::WaitingSync);
    }

    pub(crate) fn set_phase(&mut self, phase: OperationPhase) {
        self.phase = phase;
        self.is_busy = phase != OperationPhase::Idle;
    }

    pub(crate) fn complete(&mut self, error: Option<String>) {
        self.operation = OperationKind::Idle;
        self.target_name = None;
        self.started_at = None;
        self.last_completed_at = Some(Utc::now());
        self.last_success = Some(error.is_none());
        self.last_error = error;
        self.sync_blocked = false;
        self.set_phase(OperationPhase::Idle);
    }
}
