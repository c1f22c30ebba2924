//! Data models

pub mod blueprint;
pub mod deployment;
pub mod host;
