//! Lexical token definitions.
//!
//! Token classification is defined with the logos derive macro; the raw
//! kinds here only classify literals and delimiters. Matching of braces and
//! grouping into statements is not done at this layer; that is the phrase
//! parser's job.
//!
//! Two layers of kinds exist. The logos-derived [`RawKind`] covers exactly
//! what the classifier can match in source text. The public [`TokenKind`]
//! adds the synthetic kinds the pipeline produces itself: the single `Eof`
//! marker and `Error` for character data the classifier rejected. Synthetic
//! kinds never come out of the classifier.

use crate::etl::position::TextRange;
use logos::Logos;
use serde::Serialize;

/// Raw classification patterns, as understood by logos.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKind {
    /// Spaces and tabs between tokens.
    #[regex(r"[ \t]+")]
    Whitespace,

    /// A single line break (`\n`, `\r` or `\r\n`).
    #[regex(r"\r\n|\n|\r")]
    Newline,

    /// Documentation comment, attached to the following statement.
    #[regex(r"///[^\n\r]*", priority = 12)]
    DocComment,

    /// Plain line comment.
    #[regex(r"//[^\n\r]*", priority = 11)]
    LineComment,

    /// Block comment, non-nesting.
    #[regex(r"/\*[^*]*\*+([^/*][^*]*\*+)*/", priority = 11)]
    BlockComment,

    /// Identifier or keyword; the lexer does not distinguish keywords.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    /// Integer or floating point literal.
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    Number,

    /// Double or single quoted string, escapes left undecoded.
    #[regex(r#""([^"\\\n\r]|\\[^\n\r])*""#)]
    #[regex(r"'([^'\\\n\r]|\\[^\n\r])*'")]
    String,

    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[token("[")]
    OpenBracket,
    #[token("]")]
    CloseBracket,

    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,

    /// A run of operator characters (`=`, `.`, `+`, ...).
    #[regex(r"[!#$%&*+\-./:<=>?@^|~]+", priority = 2)]
    Graphics,
}

/// Classification of one lexical unit, including the synthetic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Whitespace,
    Newline,
    DocComment,
    LineComment,
    BlockComment,
    Identifier,
    Number,
    String,
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Semicolon,
    Comma,
    Graphics,
    /// Synthetic end-of-stream marker, produced once by the lexer.
    Eof,
    /// Character data the classifier could not match.
    Error,
}

impl From<RawKind> for TokenKind {
    fn from(raw: RawKind) -> Self {
        match raw {
            RawKind::Whitespace => TokenKind::Whitespace,
            RawKind::Newline => TokenKind::Newline,
            RawKind::DocComment => TokenKind::DocComment,
            RawKind::LineComment => TokenKind::LineComment,
            RawKind::BlockComment => TokenKind::BlockComment,
            RawKind::Identifier => TokenKind::Identifier,
            RawKind::Number => TokenKind::Number,
            RawKind::String => TokenKind::String,
            RawKind::OpenBrace => TokenKind::OpenBrace,
            RawKind::CloseBrace => TokenKind::CloseBrace,
            RawKind::OpenParen => TokenKind::OpenParen,
            RawKind::CloseParen => TokenKind::CloseParen,
            RawKind::OpenBracket => TokenKind::OpenBracket,
            RawKind::CloseBracket => TokenKind::CloseBracket,
            RawKind::Semicolon => TokenKind::Semicolon,
            RawKind::Comma => TokenKind::Comma,
            RawKind::Graphics => TokenKind::Graphics,
        }
    }
}

impl TokenKind {
    /// Whitespace, line breaks and comments; passed through the pipeline
    /// but never consulted by grammar matching.
    pub fn is_ignorable(self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::DocComment
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    pub fn is_comment(self) -> bool {
        matches!(
            self,
            TokenKind::DocComment | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    /// Everything grammar matching can see.
    pub fn is_significant(self) -> bool {
        !self.is_ignorable() && !matches!(self, TokenKind::Eof)
    }

    pub fn is_bracket(self) -> bool {
        matches!(
            self,
            TokenKind::OpenBrace
                | TokenKind::CloseBrace
                | TokenKind::OpenParen
                | TokenKind::CloseParen
                | TokenKind::OpenBracket
                | TokenKind::CloseBracket
        )
    }
}

/// The smallest lexical unit: a kind, its raw text, and where it came from.
///
/// Tokens are immutable once produced; downstream stages carry them by
/// value or reference but never rewrite them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub range: TextRange,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, range: TextRange) -> Self {
        Token {
            kind,
            text: text.into(),
            range,
        }
    }

    pub fn is_ignorable(&self) -> bool {
        self.kind.is_ignorable()
    }

    pub fn is_significant(&self) -> bool {
        self.kind.is_significant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut classifier = RawKind::lexer(source);
        let mut out = Vec::new();
        while let Some(result) = classifier.next() {
            out.push(match result {
                Ok(raw) => TokenKind::from(raw),
                Err(()) => TokenKind::Error,
            });
        }
        out
    }

    #[test]
    fn test_identifier_and_whitespace() {
        assert_eq!(
            kinds("doctype strict"),
            vec![
                TokenKind::Identifier,
                TokenKind::Whitespace,
                TokenKind::Identifier
            ]
        );
    }

    #[test]
    fn test_qualified_name_uses_graphics_dot() {
        assert_eq!(
            kinds("ETL.Grammar"),
            vec![
                TokenKind::Identifier,
                TokenKind::Graphics,
                TokenKind::Identifier
            ]
        );
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(kinds(r#""0.3.0""#), vec![TokenKind::String]);
        assert_eq!(kinds("'a'"), vec![TokenKind::String]);
    }

    #[test]
    fn test_comment_kinds() {
        assert_eq!(kinds("// note"), vec![TokenKind::LineComment]);
        assert_eq!(kinds("/// doc"), vec![TokenKind::DocComment]);
        assert_eq!(kinds("/* a * b */"), vec![TokenKind::BlockComment]);
    }

    #[test]
    fn test_brackets_and_separators() {
        assert_eq!(
            kinds("{;}"),
            vec![
                TokenKind::OpenBrace,
                TokenKind::Semicolon,
                TokenKind::CloseBrace
            ]
        );
    }

    #[test]
    fn test_graphics_run() {
        assert_eq!(kinds("="), vec![TokenKind::Graphics]);
        assert_eq!(kinds("=>"), vec![TokenKind::Graphics]);
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(kinds("42"), vec![TokenKind::Number]);
        assert_eq!(kinds("3.14e2"), vec![TokenKind::Number]);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let out = kinds("\"abc");
        assert!(out.contains(&TokenKind::Error));
    }

    #[test]
    fn test_predicates() {
        assert!(TokenKind::Whitespace.is_ignorable());
        assert!(TokenKind::DocComment.is_comment());
        assert!(TokenKind::Identifier.is_significant());
        assert!(TokenKind::OpenBrace.is_bracket());
        assert!(!TokenKind::Eof.is_significant());
    }
}
