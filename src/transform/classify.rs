/// Line classification for expression printing
///
/// A pure, textual classifier: no parsing, no evaluation. Each check maps to one
/// `LineKind` so the precedence rules stay visible and testable on their own.
use serde::Serialize;

/// What a single logical line looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Already prints something (`print(` anywhere, case-insensitive)
    PrintCall,
    /// `name = value`, `name += value`, `name: T = value`
    Assignment,
    /// `import x`, `from x import y`
    Import,
    /// `def`, `class`, `async def`
    Definition,
    /// Conditionals, loops, exception handlers, `with`, `else`/`elif`
    BlockOpener,
    /// `return`, `yield`, `break`, `continue`, `pass`, `raise`
    ControlTransfer,
    /// `del`, `assert`, `global`, `nonlocal`
    SimpleStatement,
    /// `# ...`
    Comment,
    /// Anything else; its value gets printed
    Expression,
}

impl LineKind {
    pub fn is_printable(self) -> bool {
        self == LineKind::Expression
    }
}

/// Any of these anywhere on the line means "comparison", never "assignment".
const COMPARISON_OPERATORS: &[&str] = &["==", "!=", "<=", ">="];

/// Characters that turn `=` into an augmented assignment (`+=`, `//=`, `**=` ...).
const AUGMENTED_OPERATOR_CHARS: &[char] = &['+', '-', '*', '/', '%', '&', '|', '^', '<', '>', '@'];

const IMPORT_KEYWORDS: &[&str] = &["import", "from"];
const DEFINITION_KEYWORDS: &[&str] = &["def", "class"];
const BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "try", "except", "finally", "with",
];
const CONTROL_KEYWORDS: &[&str] = &["return", "yield", "break", "continue", "pass", "raise"];
const SIMPLE_STATEMENT_KEYWORDS: &[&str] = &["del", "assert", "global", "nonlocal"];

/// Classify one line. Leading and trailing whitespace is ignored.
pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();

    if line.to_lowercase().contains("print(") {
        return LineKind::PrintCall;
    }
    if is_assignment(line) {
        return LineKind::Assignment;
    }
    if starts_with_any(line, IMPORT_KEYWORDS) {
        return LineKind::Import;
    }

    let (is_async, rest) = match strip_keyword(line, "async") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };
    if starts_with_any(rest, DEFINITION_KEYWORDS) {
        return LineKind::Definition;
    }
    if starts_with_any(rest, BLOCK_KEYWORDS) {
        return LineKind::BlockOpener;
    }
    if !is_async && starts_with_any(line, CONTROL_KEYWORDS) {
        return LineKind::ControlTransfer;
    }
    if !is_async && starts_with_any(line, SIMPLE_STATEMENT_KEYWORDS) {
        return LineKind::SimpleStatement;
    }
    if line.starts_with('#') {
        return LineKind::Comment;
    }

    LineKind::Expression
}

/// Textual assignment heuristic.
///
/// Comparison operators win outright. Otherwise an `=` counts when it follows an
/// identifier character or an augmented operator, and the text before the first
/// `=` does not open a call (so `f(x=1)` stays an expression).
fn is_assignment(line: &str) -> bool {
    if !line.contains('=') {
        return false;
    }
    if COMPARISON_OPERATORS.iter().any(|op| line.contains(op)) {
        return false;
    }

    let head = line.split('=').next().unwrap_or_default();
    if head.contains('(') {
        return false;
    }

    line.char_indices()
        .filter(|&(_, c)| c == '=')
        .any(|(idx, _)| {
            match line[..idx].trim_end().chars().next_back() {
                Some(prev) => is_identifier_char(prev) || AUGMENTED_OPERATOR_CHARS.contains(&prev),
                None => false,
            }
        })
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Return the remainder after `keyword` when it stands as a whole word.
fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    match rest.chars().next() {
        Some(c) if is_identifier_char(c) => None,
        _ => Some(rest),
    }
}

fn starts_with_any(line: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| strip_keyword(line, kw).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_expressions_are_printable() {
        for line in ["5+1", "x", "len(items)", "'done'", "[i * 2 for i in xs]", "await job()"] {
            assert_eq!(classify_line(line), LineKind::Expression, "{line}");
        }
    }

    #[test]
    fn print_calls_are_left_alone() {
        assert_eq!(classify_line("print('hi')"), LineKind::PrintCall);
        assert_eq!(classify_line("PRINT(x)"), LineKind::PrintCall);
        assert_eq!(classify_line("pprint(x)"), LineKind::PrintCall);
    }

    #[test]
    fn assignments() {
        for line in ["x = 5", "x=5", "total += 1", "n //= 2", "x: int = 3", "obj.attr = 1"] {
            assert_eq!(classify_line(line), LineKind::Assignment, "{line}");
        }
    }

    #[test]
    fn comparison_beats_assignment() {
        assert_eq!(classify_line("5 == 5"), LineKind::Expression);
        assert_eq!(classify_line("5==5"), LineKind::Expression);
        assert_eq!(classify_line("a != b"), LineKind::Expression);
        assert_eq!(classify_line("a <= b"), LineKind::Expression);
        // Contains a bare `=` as well, comparison still wins.
        assert_eq!(classify_line("flag = a >= b"), LineKind::Expression);
    }

    #[test]
    fn keyword_arguments_are_not_assignments() {
        assert_eq!(classify_line("dict(a=1, b=2)"), LineKind::Expression);
        assert_eq!(classify_line("sorted(xs, reverse=True)"), LineKind::Expression);
    }

    #[test]
    fn walrus_inside_parens_is_an_expression() {
        assert_eq!(classify_line("(y := 10)"), LineKind::Expression);
    }

    #[test]
    fn statements_by_keyword() {
        assert_eq!(classify_line("import math"), LineKind::Import);
        assert_eq!(classify_line("from math import pi"), LineKind::Import);
        assert_eq!(classify_line("def f(x):"), LineKind::Definition);
        assert_eq!(classify_line("class A:"), LineKind::Definition);
        assert_eq!(classify_line("async def main():"), LineKind::Definition);
        assert_eq!(classify_line("if x:"), LineKind::BlockOpener);
        assert_eq!(classify_line("elif y:"), LineKind::BlockOpener);
        assert_eq!(classify_line("else:"), LineKind::BlockOpener);
        assert_eq!(classify_line("try:"), LineKind::BlockOpener);
        assert_eq!(classify_line("except ValueError:"), LineKind::BlockOpener);
        assert_eq!(classify_line("finally:"), LineKind::BlockOpener);
        assert_eq!(classify_line("with lock:"), LineKind::BlockOpener);
        assert_eq!(classify_line("async for x in it:"), LineKind::BlockOpener);
        assert_eq!(classify_line("while(True):"), LineKind::BlockOpener);
        assert_eq!(classify_line("return x"), LineKind::ControlTransfer);
        assert_eq!(classify_line("yield"), LineKind::ControlTransfer);
        assert_eq!(classify_line("break"), LineKind::ControlTransfer);
        assert_eq!(classify_line("continue"), LineKind::ControlTransfer);
        assert_eq!(classify_line("pass"), LineKind::ControlTransfer);
        assert_eq!(classify_line("raise ValueError('x')"), LineKind::ControlTransfer);
        assert_eq!(classify_line("# done"), LineKind::Comment);
    }

    #[test]
    fn simple_statements_are_never_printed() {
        for line in ["del x", "del cache[key]", "assert x > 0", "global total", "nonlocal count"] {
            assert_eq!(classify_line(line), LineKind::SimpleStatement, "{line}");
            assert!(!classify_line(line).is_printable());
        }
        assert_eq!(classify_line("delta"), LineKind::Expression);
        assert_eq!(classify_line("asserted(x)"), LineKind::Expression);
        assert_eq!(classify_line("globals()"), LineKind::Expression);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert_eq!(classify_line("passed"), LineKind::Expression);
        assert_eq!(classify_line("format_result(x)"), LineKind::Expression);
        assert_eq!(classify_line("iffy"), LineKind::Expression);
        assert_eq!(classify_line("from_cache"), LineKind::Expression);
    }

    #[test]
    fn indentation_is_ignored() {
        assert_eq!(classify_line("    return x"), LineKind::ControlTransfer);
        assert_eq!(classify_line("\tx + 1"), LineKind::Expression);
    }
}
