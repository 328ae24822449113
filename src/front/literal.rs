//! Literal values parsed from lexemes.

use derive_more::Display;

use crate::common::{CompileError, Location, Result};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum LiteralValueKind {
    #[display("integer")]
    Integer,
    #[display("character")]
    Character,
    #[display("string")]
    String,
}

/// A literal value.  Integer literals remember their suffix hints; string
/// literals keep both the decoded bytes and the raw (still-escaped)
/// spelling, which is what ends up in the emitted read-only data.
#[derive(Clone, Debug, PartialEq)]
pub enum LiteralValue {
    Integer {
        value: i64,
        is_long: bool,
        is_unsigned: bool,
    },
    Character(char),
    String {
        value: String,
        raw: String,
    },
}

impl LiteralValue {
    pub fn kind(&self) -> LiteralValueKind {
        match self {
            LiteralValue::Integer { .. } => LiteralValueKind::Integer,
            LiteralValue::Character(_) => LiteralValueKind::Character,
            LiteralValue::String { .. } => LiteralValueKind::String,
        }
    }

    /// The immediate value of an integer or character literal.
    pub fn int_value(&self) -> Option<i64> {
        match self {
            LiteralValue::Integer { value, .. } => Some(*value),
            LiteralValue::Character(c) => Some(*c as i64),
            LiteralValue::String { .. } => None,
        }
    }

    /// Parse an integer literal lexeme, e.g. `42`, `0x1f`, `7L`, `9ul`.
    pub fn from_int_literal(text: &str, loc: Location) -> Result<LiteralValue> {
        let mut digits = text;
        let mut is_long = false;
        let mut is_unsigned = false;
        while let Some(last) = digits.chars().last() {
            match last {
                'l' | 'L' if !is_long => is_long = true,
                'u' | 'U' if !is_unsigned => is_unsigned = true,
                _ => break,
            }
            digits = &digits[..digits.len() - 1];
        }

        let parsed = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else {
            digits.parse::<u64>()
        };
        let value = parsed
            .ok()
            .filter(|&v| v <= i64::MAX as u64)
            .ok_or_else(|| {
                CompileError::semantic(loc, format!("bad integer literal '{text}'"))
            })?;

        Ok(LiteralValue::Integer {
            value: value as i64,
            is_long,
            is_unsigned,
        })
    }

    /// Parse a character literal lexeme including its quotes, e.g. `'a'`
    /// or `'\n'`.
    pub fn from_char_literal(text: &str, loc: Location) -> Result<LiteralValue> {
        let inner = text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .ok_or_else(|| {
                CompileError::semantic(loc, format!("bad character literal {text}"))
            })?;
        let decoded = decode_escapes(inner, loc)?;
        let mut chars = decoded.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(LiteralValue::Character(c)),
            _ => Err(CompileError::semantic(
                loc,
                format!("character literal {text} must contain exactly one character"),
            )),
        }
    }

    /// Parse a string literal lexeme including its quotes.
    pub fn from_str_literal(text: &str, loc: Location) -> Result<LiteralValue> {
        let raw = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .ok_or_else(|| {
                CompileError::semantic(loc, format!("bad string literal {text}"))
            })?;
        let value = decode_escapes(raw, loc)?;
        Ok(LiteralValue::String {
            value,
            raw: raw.to_owned(),
        })
    }
}

/// Decode the escape sequences in the body of a character or string
/// literal.
fn decode_escapes(s: &str, loc: Location) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let esc = chars.next().ok_or_else(|| {
            CompileError::semantic(loc, "trailing backslash in literal")
        })?;
        out.push(match esc {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            other => {
                return Err(CompileError::semantic(
                    loc,
                    format!("unknown escape sequence '\\{other}'"),
                ))
            }
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::intern;

    fn loc() -> Location {
        Location::new(intern("test.c"), 1, 1)
    }

    #[test]
    fn plain_integer() {
        let v = LiteralValue::from_int_literal("42", loc()).unwrap();
        assert_eq!(
            v,
            LiteralValue::Integer {
                value: 42,
                is_long: false,
                is_unsigned: false
            }
        );
    }

    #[test]
    fn suffixes_in_either_order() {
        for text in ["7ul", "7lu", "7UL", "7Lu"] {
            let v = LiteralValue::from_int_literal(text, loc()).unwrap();
            assert_eq!(
                v,
                LiteralValue::Integer {
                    value: 7,
                    is_long: true,
                    is_unsigned: true
                }
            );
        }
    }

    #[test]
    fn hex_integer() {
        let v = LiteralValue::from_int_literal("0x1f", loc()).unwrap();
        assert_eq!(v.int_value(), Some(31));
    }

    #[test]
    fn rejects_garbage() {
        assert!(LiteralValue::from_int_literal("12x", loc()).is_err());
    }

    #[test]
    fn char_escapes() {
        assert_eq!(
            LiteralValue::from_char_literal("'\\n'", loc()).unwrap(),
            LiteralValue::Character('\n')
        );
        assert_eq!(
            LiteralValue::from_char_literal("'a'", loc()).unwrap().int_value(),
            Some(97)
        );
    }

    #[test]
    fn string_keeps_raw_spelling() {
        let v = LiteralValue::from_str_literal("\"hi\\n\"", loc()).unwrap();
        match v {
            LiteralValue::String { value, raw } => {
                assert_eq!(value, "hi\n");
                assert_eq!(raw, "hi\\n");
            }
            _ => panic!("expected string"),
        }
    }
}
