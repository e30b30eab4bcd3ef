//! Testdeck Common Library
//!
//! Shared types, errors, and the run registry for the Testdeck platform.

pub mod error;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use registry::RunRegistry;
pub use types::*;

/// Testdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".testdeck")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("history.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
