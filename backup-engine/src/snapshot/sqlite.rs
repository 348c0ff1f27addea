//! The three SQLite primitives maintenance relies on: online copy, checkpoint
//! and integrity check.

use crate::utils::{EngineError, Result};
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

const PAGES_PER_STEP: i32 = 64;
const STEP_PAUSE: Duration = Duration::from_millis(50);
const MAX_REPORTED_PROBLEMS: usize = 5;

/// Copy a live database page by page through the backup API. Writers on other
/// connections are not blocked.
pub fn online_copy(source: &Path, dest: &Path) -> rusqlite::Result<()> {
    let src = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut dst = Connection::open(dest)?;
    {
        let backup = Backup::new(&src, &mut dst)?;
        backup.run_to_completion(PAGES_PER_STEP, STEP_PAUSE, None)?;
    }
    // The archive must be a single self-contained file.
    dst.execute_batch("PRAGMA journal_mode = DELETE;")?;
    Ok(())
}

/// Fold the write-ahead log back into the main file.
pub fn checkpoint(database: &Path) -> rusqlite::Result<()> {
    let conn = Connection::open_with_flags(
        database,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
    Ok(())
}

/// Checkpoint then copy the main file byte for byte. The checkpoint must come
/// first or the copy can miss committed pages still living in the WAL.
pub fn checkpoint_copy(source: &Path, dest: &Path) -> Result<()> {
    checkpoint(source)?;
    std::fs::copy(source, dest)?;
    Ok(())
}

/// Full `PRAGMA integrity_check` on a read-only connection; anything but a
/// single `ok` row is an [`EngineError::IntegrityFailure`].
pub fn integrity_check(database: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(
        database,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare("PRAGMA integrity_check")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if rows.len() == 1 && rows[0] == "ok" {
        return Ok(());
    }
    let name = database
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut detail: Vec<&str> = rows.iter().take(MAX_REPORTED_PROBLEMS).map(String::as_str).collect();
    if rows.len() > MAX_REPORTED_PROBLEMS {
        detail.push("...");
    }
    Err(EngineError::IntegrityFailure(format!("{name}: {}", detail.join("; "))))
}
