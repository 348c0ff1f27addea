use super::protector::SecretProtector;
use super::CredentialRestoreReport;
use crate::utils::Result;
use rusqlite::{Connection, OpenFlags, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialColumn {
    pub table: &'static str,
    pub column: &'static str,
}

/// Every credential-bearing column the application stores.
pub const CREDENTIAL_COLUMNS: &[CredentialColumn] = &[
    CredentialColumn { table: "indexers", column: "api_key" },
    CredentialColumn { table: "providers", column: "api_key" },
    CredentialColumn { table: "companion_apps", column: "api_key" },
];

enum Outcome {
    Keep,
    Reencrypted(String),
    Cleared,
}

/// Re-keys every stored credential of a restored (not yet live) database copy
/// to the running process's current key.
pub struct CredentialNormalizer {
    protector: Arc<dyn SecretProtector>,
    columns: &'static [CredentialColumn],
}

impl CredentialNormalizer {
    pub fn new(protector: Arc<dyn SecretProtector>) -> Self {
        Self {
            protector,
            columns: CREDENTIAL_COLUMNS,
        }
    }

    /// All updates commit together or not at all.
    pub fn normalize(&self, database: &Path) -> Result<CredentialRestoreReport> {
        let mut conn = Connection::open_with_flags(database, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        // The copy must stay a single file for the swap.
        conn.execute_batch("PRAGMA journal_mode = DELETE;")?;
        let tx = conn.transaction()?;
        let mut report = CredentialRestoreReport::default();

        for column in self.columns {
            if !has_column(&tx, column.table, column.column)? {
                debug!(table = column.table, column = column.column, "Credential column absent, skipping");
                continue;
            }
            self.normalize_column(&tx, column, &mut report)?;
        }

        tx.commit()?;
        info!(
            reencrypted = report.reencrypted_count,
            cleared = report.cleared_undecryptable_count,
            "Credential normalization complete"
        );
        Ok(report)
    }

    fn normalize_column(
        &self,
        tx: &Transaction<'_>,
        column: &CredentialColumn,
        report: &mut CredentialRestoreReport,
    ) -> Result<()> {
        let CredentialColumn { table, column } = *column;
        let rows: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT rowid, \"{column}\" FROM \"{table}\" WHERE \"{column}\" IS NOT NULL AND \"{column}\" != ''"
            ))?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let update = format!("UPDATE \"{table}\" SET \"{column}\" = ?1 WHERE rowid = ?2");
        for (rowid, value) in rows {
            let value = Zeroizing::new(value);
            match self.classify(&value)? {
                Outcome::Keep => {}
                Outcome::Reencrypted(sealed) => {
                    tx.execute(&update, rusqlite::params![sealed, rowid])?;
                    report.reencrypted_count += 1;
                }
                Outcome::Cleared => {
                    warn!(table, column, rowid, "Clearing credential that cannot be decrypted with the current key ring");
                    tx.execute(&update, rusqlite::params!["", rowid])?;
                    report.cleared_undecryptable_count += 1;
                }
            }
        }
        Ok(())
    }

    fn classify(&self, value: &str) -> Result<Outcome> {
        if !self.protector.is_protected(value) {
            return Ok(Outcome::Reencrypted(self.protector.protect(value)?));
        }
        let plaintext = match self.protector.unprotect(value) {
            Ok(p) => Zeroizing::new(p),
            Err(_) => return Ok(Outcome::Cleared),
        };
        if self.protector.is_current(value) {
            return Ok(Outcome::Keep);
        }
        let sealed = self.protector.protect(&plaintext)?;
        if sealed == value {
            Ok(Outcome::Keep)
        } else {
            Ok(Outcome::Reencrypted(sealed))
        }
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns.iter().any(|c| c == column))
}
