//! Sync-activity leases.

use super::Shared;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Permission for one background sync activity to touch the database.
///
/// Released on drop, whichever way the holder exits.
#[must_use = "the sync activity is only protected while the lease is held"]
pub struct SyncLease {
    shared: Arc<Shared>,
    name: String,
    acquired_at: Instant,
}

impl SyncLease {
    pub(super) fn new(shared: Arc<Shared>, name: &str) -> Self {
        Self {
            shared,
            name: name.to_string(),
            acquired_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            debug_assert!(state.active_sync_leases > 0, "lease count underflow");
            state.active_sync_leases = state.active_sync_leases.saturating_sub(1);
        }
        self.shared.released.notify_waiters();
        trace!(
            activity = %self.name,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Sync lease released"
        );
    }
}

impl std::fmt::Debug for SyncLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLease").field("name", &self.name).finish()
    }
}
