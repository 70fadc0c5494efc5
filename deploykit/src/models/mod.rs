//! Data models

pub mod artifact;
pub mod backup;
pub mod deployment;
pub mod health;
