//! Clause splitter: separates the expression from its argument clause.
//!
//! Purely lexical. The first `;` not preceded by a backslash ends the
//! expression; everything after it is the clause. The splitter never looks
//! at the mode.

use crate::error::{SyntaxError, SyntaxResult};

/// Raw input split at its first unescaped `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitInput {
    /// Expression text, trimmed, never empty.
    pub expression: String,
    /// Clause text, trimmed; `None` when absent or blank.
    pub clause: Option<String>,
}

/// Split raw request text into expression and optional clause.
pub fn split_clause(text: &str) -> SyntaxResult<SplitInput> {
    let (head, tail) = match find_separator(text) {
        Some(idx) => (&text[..idx], Some(&text[idx + 1..])),
        None => (text, None),
    };

    let expression = unescape(head.trim());
    if expression.is_empty() {
        return Err(SyntaxError::EmptyExpression);
    }

    let clause = tail
        .map(|t| unescape(t.trim()))
        .filter(|c| !c.is_empty());

    Ok(SplitInput { expression, clause })
}

/// Byte offset of the first `;` that is not escaped as `\;`.
fn find_separator(text: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            ';' if !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(text: &str) -> String {
    text.replace("\\;", ";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_separator_returns_whole_text() {
        let split = split_clause("  (x+2)(x+3) ").unwrap();
        assert_eq!(split.expression, "(x+2)(x+3)");
        assert_eq!(split.clause, None);
    }

    #[test]
    fn splits_at_first_separator_only() {
        let split = split_clause("2x^2+3x ; x=5; y=1").unwrap();
        assert_eq!(split.expression, "2x^2+3x");
        assert_eq!(split.clause.as_deref(), Some("x=5; y=1"));
    }

    #[test]
    fn blank_clause_is_absent() {
        let split = split_clause("x^2;   ").unwrap();
        assert_eq!(split.clause, None);
    }

    #[test]
    fn escaped_separator_is_not_a_split_point() {
        let split = split_clause(r"a\;b; x").unwrap();
        assert_eq!(split.expression, "a;b");
        assert_eq!(split.clause.as_deref(), Some("x"));
    }

    #[test]
    fn empty_expression_is_a_syntax_error() {
        assert_eq!(split_clause("  ; x"), Err(SyntaxError::EmptyExpression));
        assert_eq!(split_clause(""), Err(SyntaxError::EmptyExpression));
    }
}
