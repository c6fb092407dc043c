//! Observability
//!
//! Structured audit events for gate decisions, limit violations and cleanup.

pub mod audit;
