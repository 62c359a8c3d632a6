//! Random secrets that a user types back: numeric SMS codes and
//! alphanumeric link tokens.

use crate::protector::ProtectorError;
use rand::{rngs::OsRng, Rng};
use std::fmt;
use std::str::FromStr;

const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const MIN_SHORT_CODE_LENGTH: usize = 4;
pub const MAX_SHORT_CODE_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    Numeric,
    Alphanumeric,
}

impl CodeKind {
    fn charset(self) -> &'static [u8] {
        match self {
            CodeKind::Numeric => DIGITS,
            CodeKind::Alphanumeric => ALPHANUMERIC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodeKind::Numeric => "numeric",
            CodeKind::Alphanumeric => "alphanumeric",
        }
    }
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeKind {
    type Err = ProtectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numeric" => Ok(CodeKind::Numeric),
            "alphanumeric" => Ok(CodeKind::Alphanumeric),
            other => Err(ProtectorError::InvalidCodeKind(other.to_string())),
        }
    }
}

/// Draw `length` characters uniformly from the kind's alphabet using the OS RNG.
pub fn generate_code(kind: CodeKind, length: usize) -> String {
    let charset = kind.charset();
    let mut rng = OsRng;
    (0..length)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}
