//! deploykit library
//!
//! Build, ship, back up, reload and verify a supervised service on one host,
//! rolling back to the last known-good release when verification fails.

pub mod app;
pub mod backup;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod logs;
pub mod models;
pub mod storage;
pub mod supervisor;
pub mod transport;
pub mod utils;
