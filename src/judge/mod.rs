//! Language adapters.
//!
//! The engine stays language-agnostic. Adapters define the source rewrite,
//! file extension, argv and environment for each language.

pub mod adapter;
pub mod languages;
pub mod registry;

pub use adapter::LanguageAdapter;
pub use registry::adapter_for;
