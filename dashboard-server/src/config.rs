use backup_engine::MaintenanceConfig;
use std::path::PathBuf;

const DATABASE_FILE: &str = "dashboard.db";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub keys_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub log_level: String,
    pub app_version: String,
    pub sync_interval_secs: u64,
    pub maintenance_config: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "./data".into()));

        Self {
            port: var("PORT").and_then(|v| v.parse().ok()).unwrap_or(3000),
            keys_dir: var("KEYS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("keys")),
            backups_dir: var("BACKUPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("backups")),
            data_dir,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            app_version: var("APP_VERSION").unwrap_or_else(|| env!("CARGO_PKG_VERSION").into()),
            sync_interval_secs: var("SYNC_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(60),
            maintenance_config: var("MAINTENANCE_CONFIG").map(PathBuf::from),
        }
    }

    /// Engine configuration: the TOML file when one is configured, otherwise
    /// defaults rooted at the data directory.
    pub fn maintenance(&self) -> anyhow::Result<MaintenanceConfig> {
        match &self.maintenance_config {
            Some(path) => MaintenanceConfig::from_file(path),
            None => {
                let mut config = MaintenanceConfig::new(&self.data_dir, DATABASE_FILE);
                config.backup_dir = self.backups_dir.clone();
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = config(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.backups_dir, PathBuf::from("./data/backups"));
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.app_version, env!("CARGO_PKG_VERSION"));

        let maintenance = config.maintenance()?;
        assert_eq!(maintenance.database_path, PathBuf::from("./data/dashboard.db"));
        assert_eq!(maintenance.backup_dir, PathBuf::from("./data/backups"));
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("DATA_DIR", "/srv/dash"),
            ("BACKUPS_DIR", "/mnt/backups"),
            ("APP_VERSION", "4.0.1"),
            ("SYNC_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.keys_dir, PathBuf::from("/srv/dash/keys"));
        assert_eq!(config.backups_dir, PathBuf::from("/mnt/backups"));
        assert_eq!(config.app_version, "4.0.1");
        assert_eq!(config.sync_interval_secs, 60);
    }
}
