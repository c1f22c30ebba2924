//! Persistent configuration and run directories

pub mod layout;
pub mod settings;
