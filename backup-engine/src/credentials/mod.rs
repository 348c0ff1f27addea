//! Credential protection and the restore-time re-keying pass.

mod normalizer;
pub mod protector;

pub use normalizer::{CredentialColumn, CredentialNormalizer, CREDENTIAL_COLUMNS};
pub use protector::{AesGcmProtector, SecretProtector};

use serde::Serialize;

/// Outcome of one normalization pass. Returned to the caller, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRestoreReport {
    pub reencrypted_count: usize,
    pub cleared_undecryptable_count: usize,
}
