use crate::config::types::Language;
use crate::judge::adapter::LanguageAdapter;
use crate::transform::{self, PreparedSource};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct PythonAdapter;

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn source_extension(&self) -> &'static str {
        "py"
    }

    fn prepare(&self, code: &str) -> PreparedSource {
        transform::prepare(code)
    }

    fn run_command(&self, interpreter: &Path, script: &Path) -> Vec<String> {
        // -I: no user site, no PYTHON* env, script dir not on sys.path.
        // -B: no .pyc next to the script.
        vec![
            interpreter.to_string_lossy().to_string(),
            "-I".to_string(),
            "-B".to_string(),
            script.to_string_lossy().to_string(),
        ]
    }
}
