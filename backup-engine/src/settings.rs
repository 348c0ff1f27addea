//! The redacted settings export written as an archive's `config` entry.

use crate::credentials::protector::PROTECTED_PREFIX;
use chrono::Utc;
use std::collections::BTreeMap;

/// Read-only view of the application's settings store.
pub trait SettingsExporter: Send + Sync {
    fn export_settings(&self) -> anyhow::Result<BTreeMap<String, String>>;
}

/// Exporter for deployments without a settings store.
pub struct NoSettings;

impl SettingsExporter for NoSettings {
    fn export_settings(&self) -> anyhow::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }
}

const SECRET_MARKERS: &[&str] = &["key", "token", "password", "secret", "credential"];

fn looks_secret(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

/// Drop every setting whose name suggests a secret and every protected value.
pub fn redact_settings(settings: BTreeMap<String, String>) -> BTreeMap<String, String> {
    settings
        .into_iter()
        .filter(|(name, value)| !looks_secret(name) && !value.starts_with(PROTECTED_PREFIX))
        .collect()
}

/// JSON document stored as `config.json`.
pub fn config_document(exporter: &dyn SettingsExporter) -> anyhow::Result<serde_json::Value> {
    let settings = redact_settings(exporter.export_settings()?);
    Ok(serde_json::json!({
        "exportedAt": Utc::now(),
        "settings": settings,
    }))
}
