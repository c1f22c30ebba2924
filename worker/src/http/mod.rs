//! HTTP collaborators

pub mod client;
pub mod loki;
pub mod vault;
