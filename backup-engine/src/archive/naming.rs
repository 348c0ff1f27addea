//! Archive file names: generation, parsing and lookup validation.
//!
//! `{prefix}_{kind}_v{version}_{yyyyMMdd-HHmmss}[_{disambiguator}].zip`

use super::manifest::BackupKind;
use crate::utils::{EngineError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

pub const ARCHIVE_EXTENSION: &str = ".zip";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Version string reduced to `[A-Za-z0-9.-]`, with no `..` runs.
pub fn sanitize_version(version: &str) -> String {
    let mut cleaned: String = version
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

pub fn archive_name(
    prefix: &str,
    kind: BackupKind,
    app_version: &str,
    timestamp: DateTime<Utc>,
    disambiguator: Option<&str>,
) -> String {
    let mut name = format!(
        "{}_{}_v{}_{}",
        prefix,
        kind.as_str(),
        sanitize_version(app_version),
        timestamp.format(TIMESTAMP_FORMAT)
    );
    if let Some(d) = disambiguator {
        name.push('_');
        name.push_str(d);
    }
    name.push_str(ARCHIVE_EXTENSION);
    name
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArchiveName {
    pub kind: BackupKind,
    pub app_version: String,
    pub created_at: DateTime<Utc>,
}

/// Parse a name produced by [`archive_name`]; anything else yields `None`.
pub fn parse_archive_name(prefix: &str, name: &str) -> Option<ParsedArchiveName> {
    let stem = name.strip_suffix(ARCHIVE_EXTENSION)?;
    let rest = stem.strip_prefix(prefix)?.strip_prefix('_')?;

    let parts: Vec<&str> = rest.split('_').collect();
    if !(3..=4).contains(&parts.len()) {
        return None;
    }
    let kind = BackupKind::parse(parts[0])?;
    let app_version = parts[1].strip_prefix('v')?.to_string();
    let created_at = NaiveDateTime::parse_from_str(parts[2], TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();

    Some(ParsedArchiveName {
        kind,
        app_version,
        created_at,
    })
}

/// Reject names that could escape the backup directory or are not archives.
pub fn validate_archive_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(EngineError::InvalidName(format!("{name:?}: {reason}")));

    if name.is_empty() {
        return invalid("empty name");
    }
    if !name.ends_with(ARCHIVE_EXTENSION) || name.len() == ARCHIVE_EXTENSION.len() {
        return invalid("not a .zip archive");
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return invalid("path separators or traversal are not allowed");
    }
    if name.starts_with('.') {
        return invalid("hidden files are not allowed");
    }
    Ok(())
}

/// Path of `name` inside `backup_dir`, after validation.
pub fn resolve_archive_path(backup_dir: &Path, name: &str) -> Result<PathBuf> {
    validate_archive_name(name)?;
    let path = backup_dir.join(name);
    if path.parent() != Some(backup_dir) {
        return Err(EngineError::InvalidName(format!("{name:?}: outside backup directory")));
    }

    // An existing entry must really live in the backup directory (no symlink escapes).
    if let Ok(meta) = std::fs::symlink_metadata(&path) {
        if !meta.is_file() {
            return Err(EngineError::InvalidName(format!("{name:?}: not a regular file")));
        }
        let real_dir = backup_dir.canonicalize()?;
        let real = path.canonicalize()?;
        if real.parent() != Some(real_dir.as_path()) {
            return Err(EngineError::InvalidName(format!("{name:?}: outside backup directory")));
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_archive_name_format() {
        assert_eq!(
            archive_name("backup", BackupKind::Manual, "2.4.1", ts(), None),
            "backup_manual_v2.4.1_20260314-092653.zip"
        );
        assert_eq!(
            archive_name("backup", BackupKind::PreRestore, "2.4.1+build 7", ts(), Some("0badf00d")),
            "backup_pre-restore_v2.4.1-build-7_20260314-092653_0badf00d.zip"
        );
    }

    #[test]
    fn test_sanitize_version() {
        assert_eq!(sanitize_version("1.0.0-beta.2"), "1.0.0-beta.2");
        assert_eq!(sanitize_version("../../etc"), ".-.-etc");
        assert_eq!(sanitize_version("  "), "unknown");
        assert_eq!(sanitize_version("1_2"), "1-2");
    }

    #[test]
    fn test_parse_round_trip() {
        let name = archive_name("backup", BackupKind::Uploaded, "3.0.0", ts(), Some("a1b2c3d4"));
        let parsed = parse_archive_name("backup", &name).unwrap();
        assert_eq!(parsed.kind, BackupKind::Uploaded);
        assert_eq!(parsed.app_version, "3.0.0");
        assert_eq!(parsed.created_at, ts());
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_archive_name("backup", "notes.zip").is_none());
        assert!(parse_archive_name("backup", "backup_weekly_v1_20260314-092653.zip").is_none());
        assert!(parse_archive_name("backup", "other_manual_v1_20260314-092653.zip").is_none());
        assert!(parse_archive_name("backup", "backup_manual_v1_2026.zip").is_none());
    }

    #[test]
    fn test_validate_archive_name() {
        assert!(validate_archive_name("backup_manual_v1_20260314-092653.zip").is_ok());
        for bad in ["", ".zip", "a.tar", "../x.zip", "a/b.zip", "a\\b.zip", "..zip", ".hidden.zip", "a\0.zip"] {
            let err = validate_archive_name(bad).unwrap_err();
            assert!(matches!(err, EngineError::InvalidName(_)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_resolve_stays_inside_backup_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let path = resolve_archive_path(dir.path(), "b.zip")?;
        assert_eq!(path, dir.path().join("b.zip"));
        assert!(resolve_archive_path(dir.path(), "../b.zip").is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() -> Result<()> {
        let dir = TempDir::new()?;
        let outside = TempDir::new()?;
        let target = outside.path().join("secret.zip");
        std::fs::write(&target, b"x")?;
        std::os::unix::fs::symlink(&target, dir.path().join("link.zip"))?;

        let err = resolve_archive_path(dir.path(), "link.zip").unwrap_err();
        assert!(matches!(err, EngineError::InvalidName(_)));
        Ok(())
    }
}
