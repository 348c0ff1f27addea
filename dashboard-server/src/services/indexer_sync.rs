use crate::models::indexer;
use crate::state::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ACTIVITY: &str = "indexer-sync";

pub fn start_indexer_sync(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(state.config.sync_interval_secs);
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match sync_once(&state).await {
                        Ok(Some(count)) => tracing::debug!("[Sync] Refreshed {} indexers", count),
                        Ok(None) => tracing::debug!("[Sync] Skipped tick, maintenance or restart pending"),
                        Err(e) => tracing::warn!("[Sync] Indexer sync failed: {}", e),
                    }
                }
            }
        }
        tracing::info!("Indexer sync stopped");
    });
}

/// One sync pass under a sync lease. `None` when the lease was refused.
pub async fn sync_once(state: &Arc<AppState>) -> anyhow::Result<Option<usize>> {
    let Some(lease) = state.backups.try_enter_sync_activity(ACTIVITY) else {
        return Ok(None);
    };

    let db = state.db.clone();
    let count = tokio::task::spawn_blocking(move || {
        // Held until the database work is done.
        let _lease = lease;
        let conn = db.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        let indexers = indexer::find_syncable(&conn)?;
        for ix in &indexers {
            tracing::trace!("[Sync] {} ({})", ix.name, ix.url);
            indexer::mark_synced(&conn, ix.id, &now)?;
        }
        Ok::<_, anyhow::Error>(indexers.len())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Some(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use backup_engine::OperationKind;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_sync_marks_indexers() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;
        state.db.get()?.execute_batch(
            "INSERT INTO indexers (name, url, api_key) VALUES ('main', 'http://idx', 'k');",
        )?;

        assert_eq!(sync_once(&state).await?, Some(1));
        assert_eq!(state.backups.operation_state().active_sync_leases, 0);
        let synced: Option<String> =
            state
                .db
                .get()?
                .query_row("SELECT last_synced_at FROM indexers", [], |r| r.get(0))?;
        assert!(synced.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_skips_while_maintenance_runs() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let coordinator = state.backups.coordinator().clone();
        let maintenance = tokio::spawn(async move {
            coordinator
                .run_exclusive(OperationKind::Create, None, || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });

        started_rx.await?;
        assert_eq!(sync_once(&state).await?, None);

        let _ = release_tx.send(());
        maintenance.await??;
        assert_eq!(sync_once(&state).await?, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_sync_stops_after_restore_until_restart() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let state = test_state(&dir)?;
        state.db.get()?.execute_batch(
            "INSERT INTO indexers (name, url, api_key) VALUES ('main', 'http://idx', 'k');",
        )?;

        let backup = state.backups.create_backup("1.0.0").await?;
        state.backups.restore_backup(&backup.name, "1.0.0").await?;
        assert!(state.backups.restart_gate().is_restart_required());

        assert_eq!(sync_once(&state).await?, None);
        assert_eq!(state.backups.operation_state().active_sync_leases, 0);

        let fresh = rusqlite::Connection::open(dir.path().join("dashboard.db"))?;
        let synced: Option<String> = fresh.query_row("SELECT last_synced_at FROM indexers", [], |r| r.get(0))?;
        assert!(synced.is_none());
        Ok(())
    }
}
