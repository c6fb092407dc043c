//! Execution control
//!
//! Constrained spawn plus the executor that turns a prepared source into an
//! outcome.

pub mod executor;
pub mod preexec;

pub use executor::Executor;
