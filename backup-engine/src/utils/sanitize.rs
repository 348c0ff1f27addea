//! Scrubbing of free-text error messages before they leave the engine.

use regex::Regex;
use std::sync::OnceLock;

const REDACTED: &str = "[REDACTED]";
const ARCHIVE_EXTENSION: &str = ".zip";

struct Patterns {
    assignment: Regex,
    bearer: Regex,
    protected: Regex,
    long_token: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        assignment: Regex::new(
            r#"(?i)\b((?:api[_-]?key|apikey|access[_-]?token|token|password|passwd|secret|authorization)\s*["']?\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,;&"']+)"#,
        )
        .expect("valid assignment pattern"),
        bearer: Regex::new(r"(?i)\b(bearer)\s+[A-Za-z0-9._~+/=-]+").expect("valid bearer pattern"),
        protected: Regex::new(r"enc:v\d+:[0-9a-f]+:[A-Za-z0-9+/=]+").expect("valid protected pattern"),
        long_token: Regex::new(r"\b[A-Za-z0-9+/_-]{32,}={0,2}").expect("valid token pattern"),
    })
}

/// Replace anything resembling a credential in `message` with `[REDACTED]`.
pub fn sanitize_message(message: &str) -> String {
    let p = patterns();
    let out = p
        .assignment
        .replace_all(message, |caps: &regex::Captures| format!("{}{}", &caps[1], REDACTED));
    let out = p.protected.replace_all(&out, REDACTED);
    let out = p
        .bearer
        .replace_all(&out, |caps: &regex::Captures| format!("{} {}", &caps[1], REDACTED));
    // Archive names are long underscore runs too; they are not secrets.
    let out = p.long_token.replace_all(&out, |caps: &regex::Captures| {
        let token = &caps[0];
        let rest = &out[caps.get(0).map_or(0, |m| m.end())..];
        if rest.starts_with(ARCHIVE_EXTENSION) {
            token.to_string()
        } else {
            REDACTED.to_string()
        }
    });
    out.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_messages_pass_through() {
        let msg = "Backup not found: backup_manual_v1.2.0_20260101-120000.zip";
        assert_eq!(sanitize_message(msg), msg);
    }

    #[test]
    fn test_archive_names_without_dotted_version_survive() {
        let msg = "Backup not found: backup_manual_vunknown_20260314-092653.zip";
        assert_eq!(sanitize_message(msg), msg);

        let msg = "Backup not found: backup_uploaded_v2_20260314-092653_0a1b2c3d.zip";
        assert_eq!(sanitize_message(msg), msg);
    }

    #[test]
    fn test_key_value_secrets_are_redacted() {
        let out = sanitize_message("indexer rejected apikey=s3cr3tvalue; password: hunter2");
        assert!(!out.contains("s3cr3tvalue"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("apikey=[REDACTED]"));
    }

    #[test]
    fn test_bearer_tokens_are_redacted() {
        let out = sanitize_message("HTTP 401 with Authorization header Bearer eyJhbGciOi.abc.def");
        assert!(!out.contains("eyJhbGciOi"));
    }

    #[test]
    fn test_protected_blobs_and_long_tokens_are_redacted() {
        let out = sanitize_message("cannot decrypt enc:v1:0a1b2c3d:QUJDREVGR0g= from row 4");
        assert_eq!(out, "cannot decrypt [REDACTED] from row 4");

        let hexish = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        let out = sanitize_message(&format!("checksum {hexish} differs"));
        assert!(!out.contains(hexish));
    }
}
