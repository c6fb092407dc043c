//! Run-scoped filesystem safety
//!
//! Scratch files are created with unique names and removed on every exit path.

pub mod workspace;

pub use workspace::{ScratchDir, ScratchFile};
