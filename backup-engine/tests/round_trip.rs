use backup_engine::credentials::AesGcmProtector;
use backup_engine::settings::SettingsExporter;
use backup_engine::snapshot::integrity_check;
use backup_engine::{BackupKind, BackupService, MaintenanceConfig, SecretProtector};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use zip::ZipArchive;

struct StaticSettings;

impl SettingsExporter for StaticSettings {
    fn export_settings(&self) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([
            ("ui.theme".to_string(), "dark".to_string()),
            ("tmdb_api_key".to_string(), "should-not-leak".to_string()),
        ]))
    }
}

fn rows(db: &Path) -> rusqlite::Result<Vec<(i64, String, f64)>> {
    let conn = Connection::open(db)?;
    let mut stmt = conn.prepare("SELECT id, title, rating FROM media ORDER BY id")?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
    rows.collect()
}

#[tokio::test]
async fn test_backup_then_restore_reproduces_data() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let config = MaintenanceConfig::new(dir.path(), "dashboard.db");
    let db = config.database_path.clone();
    let protector = Arc::new(AesGcmProtector::from_keys(&[11u8; 32], &[])?);
    let sealed = protector.protect("indexer-secret")?;

    {
        let conn = Connection::open(&db)?;
        conn.execute_batch(
            "CREATE TABLE media (id INTEGER PRIMARY KEY, title TEXT NOT NULL, rating REAL);
             CREATE TABLE indexers (id INTEGER PRIMARY KEY, name TEXT, api_key TEXT);",
        )?;
        for i in 0..500 {
            conn.execute(
                "INSERT INTO media (title, rating) VALUES (?1, ?2)",
                rusqlite::params![format!("title {i}"), i as f64 / 10.0],
            )?;
        }
        conn.execute("INSERT INTO indexers (name, api_key) VALUES ('main', ?1)", [&sealed])?;
    }
    let expected = rows(&db)?;

    let svc = BackupService::new(config, protector.clone(), Arc::new(StaticSettings));
    let backup = svc.create_backup("3.2.0").await?;

    // The config entry never carries secrets.
    let mut archive = ZipArchive::new(std::fs::File::open(dir.path().join("backups").join(&backup.name))?)?;
    let config_json: serde_json::Value = serde_json::from_reader(archive.by_name("config.json")?)?;
    assert_eq!(config_json["settings"]["ui.theme"], "dark");
    assert!(config_json["settings"].get("tmdb_api_key").is_none());
    drop(archive);

    Connection::open(&db)?.execute_batch("DELETE FROM media WHERE id > 10; UPDATE media SET title = 'changed';")?;
    assert_ne!(rows(&db)?, expected);

    let report = svc.restore_backup(&backup.name, "3.2.0").await?;
    assert_eq!(report.reencrypted_count, 0);
    assert_eq!(report.cleared_undecryptable_count, 0);

    integrity_check(&db)?;
    assert_eq!(rows(&db)?, expected);
    let key: String = Connection::open(&db)?.query_row("SELECT api_key FROM indexers", [], |r| r.get(0))?;
    assert_eq!(key, sealed);

    // Manual archives survive a restore; a pre-restore safety copy was added.
    let archives = svc.list_backups().await?;
    assert!(archives.iter().any(|a| a.name == backup.name));
    assert!(archives.iter().any(|a| a.kind == BackupKind::PreRestore));
    Ok(())
}

#[tokio::test]
async fn test_restore_from_another_key_ring_clears_credentials() -> anyhow::Result<()> {
    let source_dir = TempDir::new()?;
    let source_config = MaintenanceConfig::new(source_dir.path(), "dashboard.db");
    let source_keys = Arc::new(AesGcmProtector::from_keys(&[21u8; 32], &[])?);
    {
        let conn = Connection::open(&source_config.database_path)?;
        conn.execute_batch("CREATE TABLE providers (id INTEGER PRIMARY KEY, api_key TEXT);")?;
        conn.execute("INSERT INTO providers (api_key) VALUES (?1)", [source_keys.protect("foreign")?])?;
        conn.execute("INSERT INTO providers (api_key) VALUES ('legacy-plaintext')", [])?;
    }
    let source = BackupService::new(source_config, source_keys, Arc::new(backup_engine::settings::NoSettings));
    let exported = source.create_backup("1.0.0").await?;
    let bytes = std::fs::read(source_dir.path().join("backups").join(&exported.name))?;

    let dir = TempDir::new()?;
    let config = MaintenanceConfig::new(dir.path(), "dashboard.db");
    let db = config.database_path.clone();
    let keys = Arc::new(AesGcmProtector::from_keys(&[22u8; 32], &[])?);
    let svc = BackupService::new(config, keys.clone(), Arc::new(backup_engine::settings::NoSettings));

    let uploaded = svc.import_backup(std::io::Cursor::new(bytes), "1.0.0").await?;
    let report = svc.restore_backup(&uploaded.name, "1.0.0").await?;
    assert_eq!(report.cleared_undecryptable_count, 1);
    assert_eq!(report.reencrypted_count, 1);

    let conn = Connection::open(&db)?;
    let mut stmt = conn.prepare("SELECT api_key FROM providers ORDER BY id")?;
    let values: Vec<String> = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<_>>()?;
    assert_eq!(values[0], "");
    assert_eq!(keys.unprotect(&values[1])?, "legacy-plaintext");
    Ok(())
}
