//! Normalizer: rewrites human-typed math into the canonical operator form.
//!
//! Three passes, left to right:
//! 1. **Superscript folding**: `x²³` becomes `x^23`
//! 2. **Exponent grouping**: `x^23` becomes `x^(23)`, `x^2y` becomes `x^(2)y`
//! 3. **Implicit multiplication**: `2x` becomes `2*x`, `(a)(b)` becomes
//!    `(a)*(b)`, while `sin(x)` stays a call
//!
//! Letter runs are split greedily against the lexicon in [`tables`]: the
//! longest known function, constant or Greek name wins, anything else is a
//! single-letter variable. A run containing `_` is one subscripted variable
//! (`x_1`). The output is a fixed point: normalizing it again changes
//! nothing.

pub mod tables;

use std::fmt;

use crate::error::{SyntaxError, SyntaxResult};
use crate::syntax::{self, Ast};

use tables::{LEXICON, WordKind, superscript_value};

/// Canonical, operator-explicit expression text plus its parse tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedExpression {
    text: String,
    ast: Ast,
}

impl NormalizedExpression {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Free variables, sorted.
    pub fn free_variables(&self) -> Vec<String> {
        self.ast.free_variables().into_iter().collect()
    }
}

impl fmt::Display for NormalizedExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Normalize expression text and validate it against the canonical grammar.
pub fn normalize(input: &str) -> SyntaxResult<NormalizedExpression> {
    let text = rewrite(input)?;
    if text.is_empty() {
        return Err(SyntaxError::EmptyExpression);
    }
    let ast = syntax::parse(&text)?;
    Ok(NormalizedExpression { text, ast })
}

/// The textual rewrite alone, without grammar validation.
pub fn rewrite(input: &str) -> SyntaxResult<String> {
    let folded = fold_superscripts(input)?;
    let tokens = tokenize(&folded)?;
    emit(&tokens)
}

// ---------------------------------------------------------------------------
// Pass 1: superscripts
// ---------------------------------------------------------------------------

fn fold_superscripts(input: &str) -> SyntaxResult<Vec<(char, usize)>> {
    let mut out: Vec<(char, usize)> = Vec::with_capacity(input.len());
    let mut in_run = false;

    for (idx, ch) in input.chars().enumerate() {
        let column = idx + 1;
        match superscript_value(ch) {
            Some(ascii) => {
                if !in_run {
                    let has_base = out
                        .iter()
                        .rev()
                        .find(|(c, _)| !c.is_whitespace())
                        .is_some_and(|(c, _)| c.is_ascii_alphanumeric() || *c == ')' || *c == '_');
                    if !has_base {
                        return Err(SyntaxError::DanglingSuperscript { column });
                    }
                    out.push(('^', column));
                    in_run = true;
                }
                out.push((ascii, column));
            }
            None => {
                in_run = false;
                out.push((ch, column));
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Pass 2: tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(String),
    Name(String, WordKind),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn tokenize(chars: &[(char, usize)]) -> SyntaxResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (ch, column) = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                let mut dots = 0;
                while i < chars.len() && (chars[i].0.is_ascii_digit() || chars[i].0 == '.') {
                    if chars[i].0 == '.' {
                        dots += 1;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(c, _)| *c).collect();
                if dots > 1 || text == "." {
                    return Err(SyntaxError::MalformedNumber { text });
                }
                tokens.push(Token::Number(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].0.is_ascii_alphabetic() || chars[i].0 == '_') {
                    i += 1;
                }
                let mut run: String = chars[start..i].iter().map(|(c, _)| *c).collect();
                if run.contains('_') {
                    // Subscripted identifier: the subscript may carry digits.
                    while i < chars.len() && (chars[i].0.is_ascii_alphanumeric() || chars[i].0 == '_') {
                        run.push(chars[i].0);
                        i += 1;
                    }
                    tokens.push(Token::Name(run, WordKind::Variable));
                } else {
                    split_letter_run(&run, &mut tokens);
                }
            }
            '*' if chars.get(i + 1).is_some_and(|(c, _)| *c == '*') => {
                tokens.push(Token::Op('^'));
                i += 2;
            }
            '+' | '-' | '*' | '/' | '^' => {
                tokens.push(Token::Op(ch));
                i += 1;
            }
            '(' => {
                open.push(column);
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                if open.pop().is_none() {
                    return Err(SyntaxError::UnmatchedParen { column });
                }
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            other => {
                return Err(SyntaxError::IllegalCharacter { ch: other, column });
            }
        }
    }

    if let Some(column) = open.pop() {
        return Err(SyntaxError::UnmatchedParen { column });
    }
    Ok(tokens)
}

/// Greedy longest-match split of a pure letter run.
fn split_letter_run(run: &str, tokens: &mut Vec<Token>) {
    let mut rest = run;
    while !rest.is_empty() {
        let word = LEXICON
            .longest_word(rest)
            .unwrap_or_else(|| &rest[..1]);
        tokens.push(Token::Name(word.to_string(), LEXICON.kind_of(word)));
        rest = &rest[word.len()..];
    }
}

// ---------------------------------------------------------------------------
// Pass 3: exponent grouping and implicit multiplication
// ---------------------------------------------------------------------------

/// What the previously emitted token was, for juxtaposition decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Operand,
    Function,
    Operator,
}

fn starts_operand(token: &Token) -> bool {
    matches!(token, Token::Number(_) | Token::Name(..) | Token::LParen)
}

fn emit(tokens: &[Token]) -> SyntaxResult<String> {
    let mut out = String::new();
    let mut prev = Prev::Start;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];

        if prev == Prev::Operand && starts_operand(token) {
            out.push('*');
        }

        match token {
            Token::Name(name, WordKind::Function) => {
                if tokens.get(i + 1) != Some(&Token::LParen) {
                    return Err(SyntaxError::BareFunction { name: name.clone() });
                }
                out.push_str(name);
                prev = Prev::Function;
                i += 1;
            }
            Token::Name(name, _) | Token::Number(name) => {
                out.push_str(name);
                prev = Prev::Operand;
                i += 1;
            }
            Token::RParen => {
                out.push(')');
                prev = Prev::Operand;
                i += 1;
            }
            Token::LParen => {
                out.push('(');
                prev = Prev::Operator;
                i += 1;
            }
            Token::Comma => {
                out.push(',');
                prev = Prev::Operator;
                i += 1;
            }
            Token::Op('^') => {
                out.push('^');
                i += 1;
                if let Some(consumed) = group_exponent(&tokens[i..], &mut out) {
                    i += consumed;
                    prev = Prev::Operand;
                } else {
                    prev = Prev::Operator;
                }
            }
            Token::Op(op) => {
                out.push(*op);
                prev = Prev::Operator;
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Parenthesize a numeric exponent that would otherwise be ambiguous.
///
/// Multi-character numbers, signed numbers and numbers directly followed by
/// another operand are wrapped; a lone digit before an operator is left
/// bare. Returns how many tokens were consumed, `None` if nothing was
/// emitted.
fn group_exponent(rest: &[Token], out: &mut String) -> Option<usize> {
    match rest {
        [Token::Op(sign @ ('-' | '+')), Token::Number(n), ..] => {
            if *sign == '-' {
                out.push_str(&format!("(-{n})"));
            } else {
                out.push_str(&format!("({n})"));
            }
            Some(2)
        }
        [Token::Number(n), tail @ ..] => {
            let juxtaposed = tail.first().is_some_and(starts_operand);
            if n.len() > 1 || juxtaposed {
                out.push_str(&format!("({n})"));
            } else {
                out.push_str(n);
            }
            Some(1)
        }
        _ => None,
    }
}
