//! replbox: REPL-style execution of untrusted Python snippets
//!
//! A submission is screened by a textual denylist, rewritten so a trailing
//! bare expression prints its value, and run by a fresh interpreter under
//! kernel rlimits and an orchestrator-side wall clock.
//!
//! # Architecture
//!
//! ## Request pipeline ([`runtime`])
//! - [`runtime::Submission`]: `Received -> Validated -> Prepared` as types
//! - [`runtime::Runtime`]: entry point shared by the HTTP service and the CLI
//!
//! ## Source handling
//! - [`security::pattern_gate`]: best-effort denylist over raw source
//! - [`transform`]: line classification and the expression-print rewrite
//! - [`judge`]: per-language adapters (argv, environment, extension)
//!
//! ## Execution ([`exec`], [`core`])
//! - [`exec::preexec`]: `spawn_constrained` with rlimits and a new process group
//! - [`core::supervisor`]: wall clock, group termination, reaping
//! - [`exec::executor`]: outcome shaping, output normalization
//!
//! ## Safety & Observability
//! - [`safety::workspace`]: scratch files removed on every exit path
//! - [`utils::output`]: bounded, draining output collectors
//! - [`observability::audit`]: structured audit events
//!
//! ## Surfaces
//! - [`server`]: axum HTTP service
//! - [`store`]: saved-snippet persistence
//! - [`cli`]: `replbox` binary
//!
//! None of this is a security boundary on its own. The denylist is trivially
//! bypassable; rlimits bound resource use but do not restrict syscalls, files
//! or network access.

// Configuration & shared types
pub mod config;

// Source screening and validation
pub mod security;

// Expression-print rewrite
pub mod transform;

// Language adapters
pub mod judge;

// Process core
pub mod core;

// Execution control
pub mod exec;

// Safety & cleanup
pub mod safety;

// Observability
pub mod observability;

// Utilities
pub mod utils;

// Request pipeline
pub mod runtime;

// Persistence
pub mod store;

// HTTP service
pub mod server;

// CLI entrypoint wiring for the replbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::Executor;
pub use runtime::Runtime;
pub use store::FileStore;
