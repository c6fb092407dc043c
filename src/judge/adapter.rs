use crate::config::types::Language;
use crate::transform::PreparedSource;
use crate::utils::env_hygiene::{self, EnvPolicy};
use std::path::Path;

/// Language adapter contract: how a submission is prepared, named on disk and
/// launched. The engine itself stays language-agnostic.
pub trait LanguageAdapter: Send + Sync {
    fn language(&self) -> Language;

    /// Extension given to scratch files, without the dot.
    fn source_extension(&self) -> &'static str;

    /// Source-level rewrite applied before the text is written to disk.
    fn prepare(&self, code: &str) -> PreparedSource;

    /// Full argv, interpreter first.
    fn run_command(&self, interpreter: &Path, script: &Path) -> Vec<String>;

    /// Child environment for a run whose working directory is `workdir`.
    fn environment(&self, workdir: &Path) -> Vec<(String, String)> {
        let mut env = EnvPolicy::default().base_environment(workdir);
        env_hygiene::sanitize(&mut env);
        env_hygiene::into_pairs(env)
    }
}
