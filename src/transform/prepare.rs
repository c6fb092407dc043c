use crate::transform::classify::{classify_line, LineKind};
use std::fmt;

/// Reserved binding that holds the captured value. Each run is a fresh
/// interpreter with nothing evaluated after the final print.
pub const RESULT_BINDING: &str = "__repl_value__";

/// Source text as it will actually be executed. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedSource {
    text: String,
    rewrite: Rewrite,
}

/// How [`prepare`] arrived at a [`PreparedSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rewrite {
    /// Submitted text runs as-is
    Unchanged,
    /// Whole submission was one expression line
    SingleExpression,
    /// Only the last non-blank line was rewritten
    TrailingExpression,
}

impl PreparedSource {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn rewrite(&self) -> Rewrite {
        self.rewrite
    }

    pub fn is_rewritten(&self) -> bool {
        self.rewrite != Rewrite::Unchanged
    }

    pub fn into_string(self) -> String {
        self.text
    }

    fn unchanged(code: &str) -> Self {
        Self {
            text: code.to_string(),
            rewrite: Rewrite::Unchanged,
        }
    }
}

impl fmt::Display for PreparedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<[u8]> for PreparedSource {
    fn as_ref(&self) -> &[u8] {
        self.text.as_bytes()
    }
}

fn capture_and_print(indent: &str, expression: &str) -> String {
    format!(
        "{indent}{RESULT_BINDING} = {expression}\n{indent}print({RESULT_BINDING})"
    )
}

/// Rewrite a submission so a trailing bare expression prints its value.
///
/// Lines other than the rewritten one are kept byte-for-byte. Anything that
/// does not end in an expression comes back unchanged.
pub fn prepare(code: &str) -> PreparedSource {
    let lines: Vec<&str> = code.split('\n').collect();
    let mut non_blank = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((first_idx, _)) = non_blank.next() else {
        return PreparedSource::unchanged(code);
    };
    let last_idx = non_blank.last().map_or(first_idx, |(idx, _)| idx);

    let last_line = lines[last_idx];
    if classify_line(last_line) != LineKind::Expression {
        return PreparedSource::unchanged(code);
    }

    if first_idx == last_idx {
        return PreparedSource {
            text: capture_and_print("", last_line.trim()),
            rewrite: Rewrite::SingleExpression,
        };
    }

    let body = last_line.trim_start();
    let indent = &last_line[..last_line.len() - body.len()];
    let mut text = lines[..last_idx].join("\n");
    text.push('\n');
    text.push_str(&capture_and_print(indent, body.trim_end()));

    PreparedSource {
        text,
        rewrite: Rewrite::TrailingExpression,
    }
}
