//! The canonical expression grammar.
//!
//! Normalized expressions, clause values and engine results all share this
//! operator-explicit form:
//!
//! ```text
//! expr  := term (("+" | "-") term)*
//! term  := unary (("*" | "/") unary)*
//! unary := ("-" | "+") unary | power
//! power := atom ("^" unary)?
//! atom  := number | name | function "(" expr ("," expr)* ")" | "(" expr ")"
//! ```
//!
//! Whitespace is skipped. Juxtaposition is not part of the grammar; the
//! normalizer makes every product explicit before text reaches here.

use std::collections::BTreeSet;

use crate::error::{SyntaxError, SyntaxResult};
use crate::normalize::tables::LEXICON;

/// Binary operators of the canonical grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
            Self::Pow => '^',
        }
    }
}

/// Parse tree of a canonical expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ast {
    /// Decimal literal exactly as written.
    Number(String),
    /// Variable or named constant.
    Name(String),
    Call { name: String, args: Vec<Ast> },
    Neg(Box<Ast>),
    Binary { op: BinOp, lhs: Box<Ast>, rhs: Box<Ast> },
}

impl Ast {
    /// Names that are not known constants.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        self.collect_variables(&mut vars);
        vars
    }

    fn collect_variables(&self, vars: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Name(name) => {
                if !LEXICON.is_constant(name) {
                    vars.insert(name.clone());
                }
            }
            Self::Call { args, .. } => args.iter().for_each(|a| a.collect_variables(vars)),
            Self::Neg(inner) => inner.collect_variables(vars),
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(vars);
                rhs.collect_variables(vars);
            }
        }
    }

    /// Whether the tree is a bare number, optionally negated.
    pub fn is_numeric_literal(&self) -> bool {
        match self {
            Self::Number(_) => true,
            Self::Neg(inner) => inner.is_numeric_literal(),
            _ => false,
        }
    }
}

/// Deepest recursion the parser accepts: parentheses, signs, exponents
/// and function calls each count one level.
pub const MAX_NESTING: usize = 256;

/// Tallest tree the parser builds. Operator chains such as `a + b + c`
/// grow one level per operand.
pub const MAX_HEIGHT: usize = 2_048;

/// Parse canonical expression text.
pub fn parse(text: &str) -> SyntaxResult<Ast> {
    let mut parser = Parser::new(text);
    let (ast, _) = parser.expr()?;
    parser.skip_ws();
    if let Some(ch) = parser.peek() {
        return Err(parser.fail(format!("unexpected '{ch}'")));
    }
    Ok(ast)
}

fn binary(op: BinOp, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// A subtree and its height.
type Node = (Ast, usize);

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn fail(&self, message: String) -> SyntaxError {
        SyntaxError::Unparseable {
            expression: self.text.to_string(),
            message,
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn grown(height: usize) -> SyntaxResult<usize> {
        let height = height + 1;
        if height > MAX_HEIGHT {
            return Err(SyntaxError::NestingTooDeep { limit: MAX_HEIGHT });
        }
        Ok(height)
    }

    fn join(op: BinOp, (lhs, lh): Node, (rhs, rh): Node) -> SyntaxResult<Node> {
        let height = Self::grown(lh.max(rh))?;
        Ok((binary(op, lhs, rhs), height))
    }

    fn expr(&mut self) -> SyntaxResult<Node> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some('+') => BinOp::Add,
                Some('-') => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Self::join(op, lhs, rhs)?;
        }
    }

    fn term(&mut self) -> SyntaxResult<Node> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some('*') => BinOp::Mul,
                Some('/') => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Self::join(op, lhs, rhs)?;
        }
    }

    /// Every recursive path passes through here, so the nesting limit is
    /// enforced in one place.
    fn unary(&mut self) -> SyntaxResult<Node> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::NestingTooDeep { limit: MAX_NESTING });
        }
        let node = self.signed();
        self.depth -= 1;
        node
    }

    fn signed(&mut self) -> SyntaxResult<Node> {
        if self.eat('-') {
            let (inner, height) = self.unary()?;
            return Ok((Ast::Neg(Box::new(inner)), Self::grown(height)?));
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> SyntaxResult<Node> {
        let base = self.atom()?;
        if self.eat('^') {
            let exponent = self.unary()?;
            return Self::join(BinOp::Pow, base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> SyntaxResult<Node> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if !self.eat(')') {
                    return Err(self.fail("expected ')'".into()));
                }
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => Ok((Ast::Number(self.number()), 1)),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.name();
                if self.peek() == Some('(') {
                    if !LEXICON.is_function(&name) {
                        return Err(self.fail(format!("`{name}` is not a function")));
                    }
                    self.pos += 1;
                    let (args, height) = self.arguments()?;
                    return Ok((Ast::Call { name, args }, Self::grown(height)?));
                }
                if LEXICON.is_function(&name) {
                    return Err(SyntaxError::BareFunction { name });
                }
                Ok((Ast::Name(name), 1))
            }
            Some(c) => Err(self.fail(format!("unexpected '{c}'"))),
            None => Err(self.fail("unexpected end of input".into())),
        }
    }

    fn arguments(&mut self) -> SyntaxResult<(Vec<Ast>, usize)> {
        let (first, mut height) = self.expr()?;
        let mut args = vec![first];
        while self.eat(',') {
            let (arg, h) = self.expr()?;
            height = height.max(h);
            args.push(arg);
        }
        if !self.eat(')') {
            return Err(self.fail("expected ')' after function arguments".into()));
        }
        Ok((args, height))
    }

    fn number(&mut self) -> String {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn name(&mut self) -> String {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }
}
