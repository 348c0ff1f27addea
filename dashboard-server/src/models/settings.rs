use crate::db::connection::DbPool;
use backup_engine::SettingsExporter;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

pub fn get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?")?;
    let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    Ok(rows.next().transpose()?)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_all(conn: &Connection) -> anyhow::Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut map = BTreeMap::new();
    for r in rows {
        let (k, v) = r?;
        map.insert(k, v);
    }
    Ok(map)
}

/// The settings table as the source of an archive's `config` entry.
pub struct SqliteSettings {
    db: DbPool,
}

impl SqliteSettings {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl SettingsExporter for SqliteSettings {
    fn export_settings(&self) -> anyhow::Result<BTreeMap<String, String>> {
        let conn = self.db.get()?;
        get_all(&conn)
    }
}
