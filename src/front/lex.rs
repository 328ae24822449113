//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::{intern, CompileError, Id, Location, Result};

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    // keywords
    #[display("void")]
    Void,
    #[display("char")]
    Char,
    #[display("short")]
    Short,
    #[display("int")]
    Int,
    #[display("long")]
    Long,
    #[display("signed")]
    Signed,
    #[display("unsigned")]
    Unsigned,
    #[display("const")]
    Const,
    #[display("volatile")]
    Volatile,
    #[display("struct")]
    Struct,
    #[display("union")]
    Union,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("while")]
    While,
    #[display("do")]
    Do,
    #[display("for")]
    For,
    #[display("return")]
    Return,
    // literals and names
    #[display("ident")]
    Ident,
    #[display("int_lit")]
    IntLit,
    #[display("char_lit")]
    CharLit,
    #[display("str_lit")]
    StrLit,
    // punctuation
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(";")]
    Semicolon,
    #[display(",")]
    Comma,
    #[display("->")]
    Arrow,
    #[display(".")]
    Dot,
    #[display("==")]
    Equality,
    #[display("!=")]
    Inequality,
    #[display("<=")]
    Lte,
    #[display(">=")]
    Gte,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Asterisk,
    #[display("/")]
    Divide,
    #[display("%")]
    Mod,
    #[display("&&")]
    LogicalAnd,
    #[display("||")]
    LogicalOr,
    #[display("&")]
    Ampersand,
    #[display("!")]
    Not,
}

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("{kind}[{text}]")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    pub loc: Location,
}

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("void", TokenKind::Void),
    ("char", TokenKind::Char),
    ("short", TokenKind::Short),
    ("int", TokenKind::Int),
    ("long", TokenKind::Long),
    ("signed", TokenKind::Signed),
    ("unsigned", TokenKind::Unsigned),
    ("const", TokenKind::Const),
    ("volatile", TokenKind::Volatile),
    ("struct", TokenKind::Struct),
    ("union", TokenKind::Union),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("do", TokenKind::Do),
    ("for", TokenKind::For),
    ("return", TokenKind::Return),
];

pub struct Lexer<'input> {
    input: &'input str,
    file: Id,
    pos: usize,
    line: u32,
    col: u32,
    whitespace: Regex,
    ident: Regex,
    number: Regex,
    char_lit: Regex,
    str_lit: Regex,
    // Ordered so that multi-character operators match first.
    operators: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str, filename: &str) -> Self {
        let op = |pat: &str, kind: TokenKind| (Regex::new(pat).unwrap(), kind);
        Lexer {
            input,
            file: intern(filename),
            pos: 0,
            line: 1,
            col: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]+|//[^\n]*|/\*(?s:.)*?\*/)*")
                .unwrap(),
            ident: Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(),
            number: Regex::new(r"\A(?:0[xX][0-9a-fA-F]+|[0-9]+)(?:[uU][lL]?|[lL][uU]?)?")
                .unwrap(),
            char_lit: Regex::new(r"\A'(?:[^'\\\n]|\\.)'").unwrap(),
            str_lit: Regex::new(r#"\A"(?:[^"\\\n]|\\.)*""#).unwrap(),
            operators: vec![
                op(r"\A->", TokenKind::Arrow),
                op(r"\A==", TokenKind::Equality),
                op(r"\A!=", TokenKind::Inequality),
                op(r"\A<=", TokenKind::Lte),
                op(r"\A>=", TokenKind::Gte),
                op(r"\A&&", TokenKind::LogicalAnd),
                op(r"\A\|\|", TokenKind::LogicalOr),
                op(r"\A\(", TokenKind::LParen),
                op(r"\A\)", TokenKind::RParen),
                op(r"\A\{", TokenKind::LBrace),
                op(r"\A\}", TokenKind::RBrace),
                op(r"\A\[", TokenKind::LBracket),
                op(r"\A\]", TokenKind::RBracket),
                op(r"\A;", TokenKind::Semicolon),
                op(r"\A,", TokenKind::Comma),
                op(r"\A\.", TokenKind::Dot),
                op(r"\A<", TokenKind::Lt),
                op(r"\A>", TokenKind::Gt),
                op(r"\A=", TokenKind::Assign),
                op(r"\A\+", TokenKind::Plus),
                op(r"\A-", TokenKind::Minus),
                op(r"\A\*", TokenKind::Asterisk),
                op(r"\A/", TokenKind::Divide),
                op(r"\A%", TokenKind::Mod),
                op(r"\A&", TokenKind::Ampersand),
                op(r"\A!", TokenKind::Not),
            ],
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn location(&self) -> Location {
        Location::new(self.file, self.line, self.col)
    }

    /// Advance position and line/column bookkeeping over `text`.
    fn advance(&mut self, text: &str) {
        self.pos += text.len();
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        let input = self.input;
        if let Some(m) = self.whitespace.find(&input[self.pos..]) {
            let text = &input[self.pos..self.pos + m.end()];
            self.advance(text);
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let loc = self.location();
        let input = self.input;
        let rest = &input[self.pos..];

        if let Some(m) = self.ident.find(rest) {
            let text = m.as_str();
            let kind = KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == text)
                .map(|(_, kind)| *kind)
                .unwrap_or(TokenKind::Ident);
            self.advance(text);
            return Ok(Some(Token { kind, text, loc }));
        }
        if let Some(m) = self.number.find(rest) {
            let text = m.as_str();
            self.advance(text);
            return Ok(Some(Token {
                kind: TokenKind::IntLit,
                text,
                loc,
            }));
        }
        if let Some(m) = self.char_lit.find(rest) {
            let text = m.as_str();
            self.advance(text);
            return Ok(Some(Token {
                kind: TokenKind::CharLit,
                text,
                loc,
            }));
        }
        if let Some(m) = self.str_lit.find(rest) {
            let text = m.as_str();
            self.advance(text);
            return Ok(Some(Token {
                kind: TokenKind::StrLit,
                text,
                loc,
            }));
        }
        let matched = self
            .operators
            .iter()
            .find_map(|(re, kind)| re.find(rest).map(|m| (m.end(), *kind)));
        if let Some((len, kind)) = matched {
            let text = &rest[..len];
            self.advance(text);
            return Ok(Some(Token { kind, text, loc }));
        }

        let bad = rest.chars().next().unwrap_or('\0');
        Err(CompileError::semantic(
            loc,
            format!("unexpected character {bad:?}"),
        ))
    }

    /// Scan the whole input eagerly.
    pub fn tokenize(mut self) -> Result<Vec<Token<'input>>> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input, "test.c")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("int main intx"),
            vec![TokenKind::Int, TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn multi_char_operators_win() {
        assert_eq!(
            kinds("a->b <= c == d && e"),
            vec![
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Ident,
                TokenKind::Lte,
                TokenKind::Ident,
                TokenKind::Equality,
                TokenKind::Ident,
                TokenKind::LogicalAnd,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n b /* block\n comment */ c"),
            vec![TokenKind::Ident, TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn literals() {
        assert_eq!(
            kinds("42 0x1fUL 'a' '\\n' \"hi\\n\""),
            vec![
                TokenKind::IntLit,
                TokenKind::IntLit,
                TokenKind::CharLit,
                TokenKind::CharLit,
                TokenKind::StrLit,
            ]
        );
    }

    #[test]
    fn tracks_locations() {
        let toks = Lexer::new("int\n  x;", "test.c").tokenize().unwrap();
        assert_eq!((toks[0].loc.line, toks[0].loc.col), (1, 1));
        assert_eq!((toks[1].loc.line, toks[1].loc.col), (2, 3));
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(Lexer::new("int $x;", "test.c").tokenize().is_err());
    }
}
