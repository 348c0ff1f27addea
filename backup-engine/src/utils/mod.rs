//! Utility modules for the backup engine.

pub mod errors;
pub mod fs;
pub mod logger;
pub mod sanitize;

pub use errors::{EngineError, ErrorKind, Result};
pub use sanitize::sanitize_message;
