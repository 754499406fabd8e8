//! Load-once lookup tables shared by the normalizer, the clause grammar
//! and the markup renderer. Built on first use, never mutated.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Names that are calls when followed by `(`.
pub const FUNCTION_NAMES: &[&str] = &[
    "sin", "cos", "tan", "cot", "sec", "csc",
    "asin", "acos", "atan", "acot", "asec", "acsc",
    "arcsin", "arccos", "arctan", "arccot", "arcsec", "arccsc",
    "sinh", "cosh", "tanh",
    "exp", "log", "ln", "sqrt", "abs", "Abs",
    "erf", "erfc", "gamma",
];

/// Named constants. Never free variables.
pub const CONSTANTS: &[&str] = &["pi", "E", "I", "oo", "inf"];

/// Multi-letter variable names that are never split into single letters.
pub const GREEK_NAMES: &[&str] = &[
    "alpha", "beta", "delta", "epsilon", "zeta", "theta", "kappa", "lambda",
    "mu", "rho", "sigma", "tau", "phi", "chi", "psi", "omega",
];

/// Unicode superscripts and their ASCII counterparts.
pub const SUPERSCRIPTS: &[(char, char)] = &[
    ('⁰', '0'), ('¹', '1'), ('²', '2'), ('³', '3'), ('⁴', '4'),
    ('⁵', '5'), ('⁶', '6'), ('⁷', '7'), ('⁸', '8'), ('⁹', '9'),
    ('⁻', '-'),
];

/// What a known word is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    Function,
    Constant,
    Variable,
}

/// The word lexicon used for greedy longest-match splitting.
pub struct Lexicon {
    functions: HashSet<&'static str>,
    constants: HashSet<&'static str>,
    greek: HashSet<&'static str>,
    longest: usize,
}

impl Lexicon {
    fn build() -> Self {
        let longest = FUNCTION_NAMES
            .iter()
            .chain(CONSTANTS)
            .chain(GREEK_NAMES)
            .map(|w| w.len())
            .max()
            .unwrap_or(1);
        Self {
            functions: FUNCTION_NAMES.iter().copied().collect(),
            constants: CONSTANTS.iter().copied().collect(),
            greek: GREEK_NAMES.iter().copied().collect(),
            longest,
        }
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains(name)
    }

    /// Classify a complete name.
    pub fn kind_of(&self, name: &str) -> WordKind {
        if self.is_function(name) {
            WordKind::Function
        } else if self.is_constant(name) {
            WordKind::Constant
        } else {
            WordKind::Variable
        }
    }

    /// Longest known multi-letter word starting at the beginning of `run`.
    pub fn longest_word(&self, run: &str) -> Option<&'static str> {
        let max = self.longest.min(run.len());
        (2..=max).rev().find_map(|len| {
            let candidate = run.get(..len)?;
            self.functions
                .get(candidate)
                .or_else(|| self.constants.get(candidate))
                .or_else(|| self.greek.get(candidate))
                .copied()
        })
    }
}

pub static LEXICON: LazyLock<Lexicon> = LazyLock::new(Lexicon::build);

/// ASCII counterpart of a Unicode superscript character.
pub fn superscript_value(ch: char) -> Option<char> {
    SUPERSCRIPTS
        .iter()
        .find_map(|&(sup, ascii)| (sup == ch).then_some(ascii))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_match_prefers_longer_function() {
        assert_eq!(LEXICON.longest_word("sinhx"), Some("sinh"));
        assert_eq!(LEXICON.longest_word("sinx"), Some("sin"));
        assert_eq!(LEXICON.longest_word("asinx"), Some("asin"));
    }

    #[test]
    fn strict_prefix_of_a_function_is_not_a_word() {
        assert_eq!(LEXICON.longest_word("si"), None);
        assert_eq!(LEXICON.longest_word("sq"), None);
    }

    #[test]
    fn constants_and_greek_are_words() {
        assert_eq!(LEXICON.longest_word("pir"), Some("pi"));
        assert_eq!(LEXICON.longest_word("theta"), Some("theta"));
        assert_eq!(LEXICON.kind_of("oo"), WordKind::Constant);
        assert_eq!(LEXICON.kind_of("theta"), WordKind::Variable);
    }

    #[test]
    fn superscripts_map_to_ascii() {
        assert_eq!(superscript_value('²'), Some('2'));
        assert_eq!(superscript_value('⁻'), Some('-'));
        assert_eq!(superscript_value('2'), None);
    }
}
