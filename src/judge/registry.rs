use crate::config::types::{Language, Result};
use crate::judge::adapter::LanguageAdapter;
use crate::judge::languages::python::PythonAdapter;

/// Look up the adapter for a request's `language` field. Matching is exact.
pub fn adapter_for(language: &str) -> Result<Box<dyn LanguageAdapter>> {
    match language.parse::<Language>()? {
        Language::Python => Ok(Box::new(PythonAdapter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ReplboxError;

    #[test]
    fn python_is_registered() {
        assert_eq!(adapter_for("python").unwrap().language(), Language::Python);
    }

    #[test]
    fn everything_else_is_unsupported() {
        for name in ["Python", "py", "javascript", ""] {
            match adapter_for(name) {
                Err(ReplboxError::UnsupportedLanguage(got)) => assert_eq!(got, name),
                _ => panic!("{name:?} should be unsupported"),
            }
        }
    }
}
