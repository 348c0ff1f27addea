//! Backup Engine Library
//!
//! Backup, restore and exclusive-maintenance coordination for the dashboard's
//! embedded SQLite database.

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod restart_gate;
pub mod service;
pub mod settings;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveDescriptor, BackupKind};
pub use config::{MaintenanceConfig, MaintenanceLimits};
pub use coordinator::{OperationCoordinator, OperationKind, OperationPhase, OperationState, SyncLease};
pub use credentials::{AesGcmProtector, CredentialRestoreReport, SecretProtector};
pub use restart_gate::{RestartGate, RESTART_REQUIRED_MESSAGE};
pub use service::{BackupService, BackupStore};
pub use settings::SettingsExporter;
pub use utils::errors::{EngineError, ErrorKind};
pub type Result<T> = std::result::Result<T, EngineError>;
