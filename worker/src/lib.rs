//! Clouding Worker Library
//!
//! Turns queued deployment jobs into automation runs: validates blueprint
//! parameters, generates the plan and inventory, drives the executor and
//! records per-host outcomes.

pub mod amqp;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod mqtt;
pub mod plan;
pub mod repository;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;
pub mod workers;
