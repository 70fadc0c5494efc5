//! Backup store

pub mod manager;

pub use manager::{BackupManager, DEFAULT_RETENTION};
