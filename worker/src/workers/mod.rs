//! Long-running workers

pub mod consumer;
pub mod intake;
