use crate::config::AppConfig;
use crate::db::connection::DbPool;
use backup_engine::BackupService;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub backups: Arc<BackupService>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, backups: Arc<BackupService>) -> Self {
        Self { db, config, backups }
    }
}

#[cfg(test)]
pub(crate) fn test_state(dir: &tempfile::TempDir) -> anyhow::Result<Arc<AppState>> {
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use crate::models::settings::SqliteSettings;
    use backup_engine::{AesGcmProtector, MaintenanceConfig};

    let maintenance = MaintenanceConfig::new(dir.path(), "dashboard.db");
    let keys_dir = dir.path().join("keys");
    let pool = create_pool(&maintenance.database_path)?;
    migrate(&pool, dir.path(), &keys_dir)?;

    let config = AppConfig {
        port: 0,
        data_dir: dir.path().to_path_buf(),
        keys_dir: keys_dir.clone(),
        backups_dir: maintenance.backup_dir.clone(),
        log_level: "info".into(),
        app_version: "1.0.0".into(),
        sync_interval_secs: 60,
        maintenance_config: None,
    };
    let protector = Arc::new(AesGcmProtector::load_or_create(&keys_dir)?);
    let settings = Arc::new(SqliteSettings::new(pool.clone()));
    let backups = Arc::new(BackupService::new(maintenance, protector, settings));
    Ok(Arc::new(AppState::new(pool, config, backups)))
}
