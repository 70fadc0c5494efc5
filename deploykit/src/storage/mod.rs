//! Deployment tree storage

pub mod history;
pub mod layout;
pub mod settings;
pub mod tree;
