//! Plan generation: parameter validation, role compilation and artifacts

pub mod generator;
pub mod roles;
pub mod validator;
