//! AMQP job queue transport

pub mod client;
