//! Expression-print transform
//!
//! Rewrites a submission whose last line is a bare expression so the value is
//! bound to a reserved name and printed, the way an interactive shell would
//! echo it. Pure text in, text out; nothing here spawns processes.

pub mod classify;
pub mod prepare;

pub use classify::{classify_line, LineKind};
pub use prepare::{prepare, PreparedSource, Rewrite, RESULT_BINDING};
