//! MQTT job queue transport

pub mod client;
pub mod topics;
