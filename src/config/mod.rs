//! Configuration and policy
//!
//! Shared types, service settings, and startup validation.

pub mod settings;
pub mod types;
pub mod validator;
