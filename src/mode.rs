//! The closed set of operations a request can ask for.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::ValidationError;

/// Which operation a request asks for.
///
/// Determines the argument grammar applied to the clause and the
/// post-processing the formatter applies to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModeTag {
    Expand,
    Simplify,
    Factor,
    Substitute,
    Integrate,
    Differentiate,
    Resimplify,
    LaplaceT,
    FourierT,
    MellinT,
}

impl ModeTag {
    /// Every mode, in menu order.
    pub const ALL: [ModeTag; 10] = [
        Self::Expand,
        Self::Simplify,
        Self::Factor,
        Self::Substitute,
        Self::Integrate,
        Self::Differentiate,
        Self::Resimplify,
        Self::LaplaceT,
        Self::FourierT,
        Self::MellinT,
    ];

    /// The name used on the wire and in history records.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Simplify => "simplify",
            Self::Factor => "factor",
            Self::Substitute => "substitute",
            Self::Integrate => "integrate",
            Self::Differentiate => "differentiate",
            Self::Resimplify => "resimplify",
            Self::LaplaceT => "laplace_t",
            Self::FourierT => "fourier_t",
            Self::MellinT => "mellin_t",
        }
    }

    /// Whether this mode is one of the three integral transforms.
    pub fn is_transform(self) -> bool {
        matches!(self, Self::LaplaceT | Self::FourierT | Self::MellinT)
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ModeTag {
    type Err = ValidationError;

    /// Case-insensitive; surrounding whitespace, `-` and `_` are ignored
    /// so `Laplace_T`, `laplace-t` and `laplacet` all match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let mode = match key.as_str() {
            "expand" => Self::Expand,
            "simplify" => Self::Simplify,
            "factor" => Self::Factor,
            "substitute" => Self::Substitute,
            "integrate" => Self::Integrate,
            "differentiate" => Self::Differentiate,
            "resimplify" => Self::Resimplify,
            "laplacet" => Self::LaplaceT,
            "fouriert" => Self::FourierT,
            "mellint" => Self::MellinT,
            _ => {
                return Err(ValidationError::UnknownMode {
                    mode: s.trim().to_string(),
                });
            }
        };
        Ok(mode)
    }
}

impl Serialize for ModeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Expand".parse::<ModeTag>().unwrap(), ModeTag::Expand);
        assert_eq!(" LAPLACE_T ".parse::<ModeTag>().unwrap(), ModeTag::LaplaceT);
        assert_eq!("mellin-t".parse::<ModeTag>().unwrap(), ModeTag::MellinT);
    }

    #[test]
    fn wire_names_round_trip() {
        for mode in ModeTag::ALL {
            assert_eq!(mode.wire_name().parse::<ModeTag>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = "solve".parse::<ModeTag>().unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownMode {
                mode: "solve".into()
            }
        );
    }
}
