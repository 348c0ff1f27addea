use rusqlite::{params, Connection};

#[derive(Debug, Clone)]
pub struct Indexer {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub last_synced_at: Option<String>,
}

/// Enabled indexers that have a credential configured.
pub fn find_syncable(conn: &Connection) -> anyhow::Result<Vec<Indexer>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, url, last_synced_at FROM indexers
         WHERE enabled = 1 AND api_key != '' ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Indexer {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            last_synced_at: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn mark_synced(conn: &Connection, id: i64, at: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE indexers SET last_synced_at = ?1 WHERE id = ?2",
        params![at, id],
    )?;
    Ok(())
}
