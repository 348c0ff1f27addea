//! Secret protection primitive.
//!
//! Protected values look like `enc:v1:{key_id}:{base64(nonce || ciphertext)}`.
//! `key_id` is the first 8 hex characters of SHA-256 over the raw key, so a
//! value can be routed to the right key of the ring without trial decryption.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Context};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const PROTECTED_PREFIX: &str = "enc:";
const VERSION_TAG: &str = "v1";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub const CURRENT_KEY_FILE: &str = "secrets.key";
pub const RETIRED_KEYS_DIR: &str = "retired";

pub trait SecretProtector: Send + Sync {
    /// Encrypt under the current key.
    fn protect(&self, plaintext: &str) -> anyhow::Result<String>;

    /// Decrypt a protected value with whichever ring key tagged it.
    fn unprotect(&self, value: &str) -> anyhow::Result<String>;

    /// Whether `value` carries the protected-value tag (any version, any key).
    fn is_protected(&self, value: &str) -> bool;

    /// Whether `value` was protected by the key [`protect`](Self::protect) uses now.
    fn is_current(&self, value: &str) -> bool;
}

struct RingKey {
    id: String,
    cipher: Aes256Gcm,
}

impl RingKey {
    fn new(raw: &[u8]) -> anyhow::Result<Self> {
        if raw.len() != KEY_LEN {
            bail!("key must be {KEY_LEN} bytes, got {}", raw.len());
        }
        let id = hex::encode(Sha256::digest(raw))[..8].to_string();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(raw));
        Ok(Self { id, cipher })
    }
}

/// AES-256-GCM key ring: one current key plus any number of retired keys that
/// are only used for decryption.
pub struct AesGcmProtector {
    current: RingKey,
    retired: Vec<RingKey>,
}

impl AesGcmProtector {
    pub fn from_keys(current: &[u8], retired: &[&[u8]]) -> anyhow::Result<Self> {
        let current = RingKey::new(current)?;
        let retired = retired
            .iter()
            .map(|raw| RingKey::new(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { current, retired })
    }

    /// Load `{keys_dir}/secrets.key`, generating it on first run, plus every
    /// `{keys_dir}/retired/*.key`.
    pub fn load_or_create(keys_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(keys_dir)?;
        let current_path = keys_dir.join(CURRENT_KEY_FILE);
        let current = if current_path.exists() {
            read_key_file(&current_path)?
        } else {
            create_key_file(&current_path)?
        };

        let mut retired = Vec::new();
        let retired_dir = keys_dir.join(RETIRED_KEYS_DIR);
        if retired_dir.is_dir() {
            for entry in fs::read_dir(&retired_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("key") {
                    continue;
                }
                match read_key_file(&path) {
                    Ok(raw) => retired.push(raw),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable retired key"),
                }
            }
        }

        let retired_refs: Vec<&[u8]> = retired.iter().map(|k| k.as_slice()).collect();
        let protector = Self::from_keys(&current, &retired_refs)?;
        info!(
            key_id = %protector.current.id,
            retired = protector.retired.len(),
            "Loaded secret key ring"
        );
        Ok(protector)
    }

    pub fn current_key_id(&self) -> &str {
        &self.current.id
    }

    fn key_for(&self, id: &str) -> Option<&RingKey> {
        std::iter::once(&self.current)
            .chain(self.retired.iter())
            .find(|k| k.id == id)
    }
}

/// Split `enc:v1:{id}:{payload}` into `(id, payload)`.
fn parse_protected(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix(PROTECTED_PREFIX)?;
    let rest = rest.strip_prefix(VERSION_TAG)?.strip_prefix(':')?;
    let (id, payload) = rest.split_once(':')?;
    if id.is_empty() || payload.is_empty() {
        return None;
    }
    Some((id, payload))
}

impl SecretProtector for AesGcmProtector {
    fn protect(&self, plaintext: &str) -> anyhow::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .current
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| anyhow!("encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!(
            "{PROTECTED_PREFIX}{VERSION_TAG}:{}:{}",
            self.current.id,
            general_purpose::STANDARD.encode(blob)
        ))
    }

    fn unprotect(&self, value: &str) -> anyhow::Result<String> {
        let (id, payload) = parse_protected(value).ok_or_else(|| anyhow!("value is not a v1 protected value"))?;
        let key = self
            .key_for(id)
            .ok_or_else(|| anyhow!("key {id} is not in the key ring"))?;

        let blob = general_purpose::STANDARD
            .decode(payload)
            .context("protected payload is not base64")?;
        if blob.len() <= NONCE_LEN {
            bail!("protected payload is truncated");
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            key.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| anyhow!("decryption failed under key {id}"))?,
        );
        String::from_utf8(plaintext.to_vec()).context("decrypted value is not UTF-8")
    }

    fn is_protected(&self, value: &str) -> bool {
        value.starts_with(PROTECTED_PREFIX)
    }

    fn is_current(&self, value: &str) -> bool {
        matches!(parse_protected(value), Some((id, _)) if id == self.current.id)
    }
}

fn read_key_file(path: &Path) -> anyhow::Result<Zeroizing<Vec<u8>>> {
    let content = Zeroizing::new(fs::read_to_string(path)?);
    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(content.trim())
            .with_context(|| format!("{} is not base64", path.display()))?,
    );
    if raw.len() != KEY_LEN {
        bail!("{} holds {} bytes, expected {KEY_LEN}", path.display(), raw.len());
    }
    Ok(raw)
}

fn create_key_file(path: &Path) -> anyhow::Result<Zeroizing<Vec<u8>>> {
    let mut raw = Zeroizing::new(vec![0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut raw);
    let encoded = Zeroizing::new(general_purpose::STANDARD.encode(raw.as_slice()));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(encoded.as_bytes())?;
    file.sync_all()?;

    info!(path = %path.display(), "Generated new secret key");
    Ok(raw)
}
