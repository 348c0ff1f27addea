//! Exclusive-maintenance gate and sync-activity quiescence.
//!
//! Background sync tasks take cheap, concurrent [`SyncLease`]s. A maintenance
//! operation (create/restore/delete/purge/upload) runs through
//! [`OperationCoordinator::run_exclusive`]: it takes a single binary gate with a
//! bounded wait, blocks new leases, waits (bounded) for the existing ones to
//! drain, and only then runs its action.

mod lease;
pub mod state;

pub use lease::SyncLease;
pub use state::{OperationKind, OperationPhase, OperationState};

use crate::config::MaintenanceLimits;
use crate::utils::{sanitize_message, EngineError, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct Shared {
    state: Mutex<OperationState>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded waits used by the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorTimeouts {
    pub gate: Duration,
    pub drain: Duration,
    pub poll_interval: Duration,
}

impl From<&MaintenanceLimits> for CoordinatorTimeouts {
    fn from(limits: &MaintenanceLimits) -> Self {
        Self {
            gate: limits.gate_timeout(),
            drain: limits.drain_timeout(),
            poll_interval: limits.drain_poll_interval(),
        }
    }
}

pub struct OperationCoordinator {
    shared: Arc<Shared>,
    gate: tokio::sync::Mutex<()>,
    timeouts: CoordinatorTimeouts,
}

impl OperationCoordinator {
    pub fn new(timeouts: CoordinatorTimeouts) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(OperationState::default()),
                released: Notify::new(),
            }),
            gate: tokio::sync::Mutex::new(()),
            timeouts,
        }
    }

    /// Take a sync lease unless an exclusive operation is draining or running.
    pub fn try_enter_sync_activity(&self, name: &str) -> Option<SyncLease> {
        let mut state = self.shared.lock();
        if state.sync_blocked {
            debug!(activity = name, operation = state.operation.as_str(), "Sync activity refused during maintenance");
            return None;
        }
        state.active_sync_leases += 1;
        drop(state);
        Some(SyncLease::new(self.shared.clone(), name))
    }

    pub fn state(&self) -> OperationState {
        self.shared.lock().clone()
    }

    /// Run `action` exclusively, waiting up to the gate timeout for the gate.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        kind: OperationKind,
        target: Option<&str>,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(Some(self.timeouts.gate), kind, target, None, action)
            .await
    }

    /// Like [`run_exclusive`](Self::run_exclusive) but queues behind a running
    /// operation instead of failing. The drain wait stays bounded.
    pub async fn run_exclusive_wait<T, F, Fut>(
        &self,
        kind: OperationKind,
        target: Option<&str>,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(None, kind, target, None, action).await
    }

    /// Like [`run_exclusive`](Self::run_exclusive); `cancel` aborts the drain wait.
    pub async fn run_exclusive_cancellable<T, F, Fut>(
        &self,
        kind: OperationKind,
        target: Option<&str>,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(Some(self.timeouts.gate), kind, target, Some(cancel), action)
            .await
    }

    async fn run<T, F, Fut>(
        &self,
        gate_timeout: Option<Duration>,
        kind: OperationKind,
        target: Option<&str>,
        cancel: Option<&CancellationToken>,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = match gate_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.gate.lock())
                .await
                .map_err(|_| busy_conflict(kind))?,
            None => self.gate.lock().await,
        };

        let guard = ExclusiveGuard::begin(&self.shared, permit, kind, target);
        info!(operation = kind.as_str(), archive = ?target, "Maintenance operation waiting for sync activities");

        if let Err(e) = self.wait_for_drain(cancel).await {
            warn!(operation = kind.as_str(), error = %e, "Maintenance operation abandoned before start");
            guard.finish(Some(&e));
            return Err(e);
        }

        guard.set_running();
        info!(operation = kind.as_str(), archive = ?target, "Maintenance operation running");

        let outcome = action().await;
        match &outcome {
            Ok(_) => {
                info!(operation = kind.as_str(), "Maintenance operation completed");
                guard.finish(None);
            }
            Err(e) => {
                warn!(operation = kind.as_str(), error = %e, "Maintenance operation failed");
                guard.finish(Some(e));
            }
        }
        outcome
    }

    async fn wait_for_drain(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.drain;
        loop {
            // Registered before the count is read so a release in between is not missed.
            let released = self.shared.released.notified();
            let active = self.shared.lock().active_sync_leases;
            if active == 0 {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Conflict(format!(
                    "Sync activities still running ({active} active); try again later"
                )));
            }

            let wait = self.timeouts.poll_interval.min(deadline - now);
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(wait) => {}
                _ = cancelled(cancel) => {
                    return Err(EngineError::Conflict(
                        "Maintenance operation cancelled while waiting for sync activities".into(),
                    ));
                }
            }
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn busy_conflict(kind: OperationKind) -> EngineError {
    EngineError::Conflict(format!(
        "Another maintenance operation is in progress; cannot start {} now",
        kind.as_str()
    ))
}

/// Holds the gate for one exclusive operation and guarantees the published
/// state returns to idle, including when the future is dropped mid-flight.
struct ExclusiveGuard<'a> {
    shared: &'a Shared,
    finished: bool,
    _permit: tokio::sync::MutexGuard<'a, ()>,
}

impl<'a> ExclusiveGuard<'a> {
    fn begin(
        shared: &'a Shared,
        permit: tokio::sync::MutexGuard<'a, ()>,
        kind: OperationKind,
        target: Option<&str>,
    ) -> Self {
        shared.lock().begin(kind, target);
        Self {
            shared,
            finished: false,
            _permit: permit,
        }
    }

    fn set_running(&self) {
        self.shared.lock().set_phase(OperationPhase::Running);
    }

    fn finish(mut self, error: Option<&EngineError>) {
        self.shared
            .lock()
            .complete(error.map(|e| sanitize_message(&e.to_string())));
        self.finished = true;
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Maintenance operation aborted before completion");
            self.shared
                .lock()
                .complete(Some("Operation aborted before completion".into()));
        }
    }
}
