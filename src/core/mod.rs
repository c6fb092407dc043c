//! Language-agnostic process core.
//!
//! Core owns the process model: spawn, wall clock supervision, process group
//! termination and reaping. Language-specific argv and environment come from
//! the adapters in `judge`.

pub mod supervisor;
pub mod types;
