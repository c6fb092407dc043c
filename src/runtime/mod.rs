//! Request pipeline
//!
//! A submission moves through `Received -> Validated -> Prepared` as distinct
//! types, so source can only reach the executor after the language check and
//! the pattern gate have both passed. Running and cleanup happen inside
//! [`Executor::execute_since`].

use crate::config::settings::ServiceConfig;
use crate::config::types::{ExecutionOutcome, ExecutionRequest, ReplboxError, Result};
use crate::exec::Executor;
use crate::judge::{adapter_for, LanguageAdapter};
use crate::observability::audit;
use crate::security::pattern_gate;
use crate::transform::PreparedSource;
use std::time::Instant;

/// Freshly accepted request
pub struct Received {
    code: String,
    language: String,
}

/// Language known and pattern gate passed
pub struct Validated {
    code: String,
    adapter: Box<dyn LanguageAdapter>,
}

/// Source rewritten and ready to run
pub struct Prepared {
    source: PreparedSource,
    adapter: Box<dyn LanguageAdapter>,
}

/// One request on its way through the pipeline.
pub struct Submission<S> {
    started: Instant,
    input: Option<String>,
    state: S,
}

impl Submission<Received> {
    pub fn new(request: ExecutionRequest) -> Self {
        Self::received_at(request, Instant::now())
    }

    /// Accept `request`, counting its duration from `started`.
    pub fn received_at(request: ExecutionRequest, started: Instant) -> Self {
        Submission {
            started,
            input: request.input_data,
            state: Received {
                code: request.code,
                language: request.language,
            },
        }
    }

    /// Language check first, then the pattern gate over the raw source.
    pub fn validate(self) -> Result<Submission<Validated>> {
        let Received { code, language } = self.state;

        let adapter = adapter_for(&language).inspect_err(|_| {
            audit::unsupported_language(&language);
        })?;

        if let Err(rejected) = pattern_gate::scan(&code) {
            audit::pattern_rejected(rejected.pattern);
            return Err(ReplboxError::from(rejected));
        }

        Ok(Submission {
            started: self.started,
            input: self.input,
            state: Validated { code, adapter },
        })
    }
}

impl Submission<Validated> {
    pub fn prepare(self) -> Submission<Prepared> {
        let Validated { code, adapter } = self.state;
        let source = adapter.prepare(&code);
        if source.is_rewritten() {
            log::debug!("Trailing expression rewritten ({:?})", source.rewrite());
        }

        Submission {
            started: self.started,
            input: self.input,
            state: Prepared { source, adapter },
        }
    }
}

impl Submission<Prepared> {
    pub fn source(&self) -> &PreparedSource {
        &self.state.source
    }

    pub fn run(self, executor: &Executor) -> ExecutionOutcome {
        executor.execute_since(
            self.started,
            self.state.adapter.as_ref(),
            &self.state.source,
            self.input.as_deref(),
        )
    }
}

/// Entry point shared by the HTTP service and the CLI.
pub struct Runtime {
    executor: Executor,
}

impl Runtime {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::new(Executor::new(config)?))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run one request end to end.
    ///
    /// `Err` means the request was rejected before anything ran (unsupported
    /// language or denylisted pattern). Everything that happens after that,
    /// including orchestration faults, is reported inside the outcome.
    pub fn handle(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        self.handle_since(request, Instant::now())
    }

    /// Like [`Runtime::handle`], for a request accepted at `started`. Time
    /// spent queued before this call counts toward duration and the wall
    /// clock.
    pub fn handle_since(&self, request: ExecutionRequest, started: Instant) -> Result<ExecutionOutcome> {
        let prepared = Submission::received_at(request, started)
            .validate()?
            .prepare();
        Ok(prepared.run(&self.executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ResourceLimits;
    use crate::safety::ScratchDir;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn runtime(temp: &TempDir) -> Runtime {
        Runtime::new(Executor::from_parts(
            ScratchDir::new(temp.path()).unwrap(),
            PathBuf::from("/nonexistent/python3"),
            ResourceLimits::default(),
        ))
    }

    #[test]
    fn unsupported_language_is_rejected_before_the_gate() {
        let request = ExecutionRequest {
            code: "import sys".to_string(),
            language: "ruby".to_string(),
            input_data: None,
        };
        let err = Submission::new(request).validate().err().unwrap();
        assert!(matches!(err, ReplboxError::UnsupportedLanguage(ref l) if l == "ruby"));
    }

    #[test]
    fn denylisted_source_is_rejected_with_the_pattern() {
        let temp = TempDir::new().unwrap();
        let err = runtime(&temp)
            .handle(ExecutionRequest::python("import sys\nsys.exit(1)"))
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(err.to_string(), "Code contains restricted operations: import sys");
    }

    #[test]
    fn gate_sees_the_raw_source() {
        // `print(` is added by the rewrite; `input(` must be caught before it.
        let err = Submission::new(ExecutionRequest::python("input()"))
            .validate()
            .err()
            .unwrap();
        assert!(matches!(err, ReplboxError::RejectedPattern("input(")));
    }

    #[test]
    fn prepared_stage_carries_the_rewrite() {
        let prepared = Submission::new(ExecutionRequest::python("5+1"))
            .validate()
            .unwrap()
            .prepare();
        assert_eq!(
            prepared.source().as_str(),
            "__repl_value__ = 5+1\nprint(__repl_value__)"
        );
    }

    #[test]
    fn duration_counts_from_acceptance() {
        let temp = TempDir::new().unwrap();
        let accepted = Instant::now() - std::time::Duration::from_millis(500);
        let outcome = runtime(&temp)
            .handle_since(ExecutionRequest::python("1"), accepted)
            .unwrap();
        assert!(outcome.duration >= std::time::Duration::from_millis(500));
    }

    #[test]
    fn orchestration_failures_are_outcomes() {
        let temp = TempDir::new().unwrap();
        let outcome = runtime(&temp)
            .handle(ExecutionRequest::python("1 + 1"))
            .unwrap();
        assert_eq!(
            outcome.kind,
            crate::config::types::OutcomeKind::OrchestrationFailure
        );
    }
}
