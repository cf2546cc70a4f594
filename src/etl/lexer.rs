//! Pull-driven incremental lexer.
//!
//! The lexer turns raw character chunks into [`Token`]s one at a time. It
//! is the bottom of the pipeline and the only stage that accepts character
//! data directly: callers feed chunks with [`Lexer::push_chunk`] and step
//! the stage with [`Lexer::parse`], which reports the shared four-state
//! protocol. Classification itself is delegated to the logos-derived
//! [`TokenKind`]; this module only adds chunk buffering, position tracking
//! and the end-of-input handshake.
//!
//! A token that would end exactly at the end of a non-final buffer is
//! withheld and `InputNeeded` is reported instead, because the next chunk
//! may extend it (an identifier split across chunks, say). Once the caller
//! marks the input final, buffered text is consumed to the end and a single
//! synthetic `Eof` token is produced before the terminal state.

use crate::etl::position::{Position, TextRange};
use crate::etl::protocol::ParseResult;
use crate::etl::tokens::{RawKind, Token, TokenKind};
use logos::Logos;

/// How much consumed prefix may accumulate before the buffer is compacted.
const COMPACT_THRESHOLD: usize = 8 * 1024;

/// Streaming lexer over chunked character input.
pub struct Lexer {
    system_id: String,
    buffer: String,
    consumed: usize,
    position: Position,
    pending: Option<Token>,
    eof_emitted: bool,
    finished: bool,
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            system_id: String::new(),
            buffer: String::new(),
            consumed: 0,
            position: Position::start(),
            pending: None,
            eof_emitted: false,
            finished: false,
        }
    }

    /// Reset for a new logical input.
    pub fn start(&mut self, system_id: &str, initial_position: Position) {
        self.system_id = system_id.to_string();
        self.buffer.clear();
        self.consumed = 0;
        self.position = initial_position;
        self.pending = None;
        self.eof_emitted = false;
        self.finished = false;
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Append raw characters to the internal buffer.
    pub fn push_chunk(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Advance until one token is pending, more input is needed, or the
    /// stream is exhausted.
    pub fn parse(&mut self, final_chunk: bool) -> ParseResult {
        if self.pending.is_some() {
            return ParseResult::OutputAvailable;
        }
        if self.finished {
            return ParseResult::Eof;
        }

        self.compact();
        let rest = &self.buffer[self.consumed..];
        if rest.is_empty() {
            if !final_chunk {
                return ParseResult::InputNeeded;
            }
            if self.eof_emitted {
                self.finished = true;
                return ParseResult::Eof;
            }
            self.eof_emitted = true;
            self.pending = Some(Token::new(
                TokenKind::Eof,
                "",
                TextRange::at(self.position),
            ));
            return ParseResult::OutputAvailable;
        }

        let mut classifier = RawKind::lexer(rest);
        let kind = match classifier.next() {
            Some(Ok(raw)) => TokenKind::from(raw),
            Some(Err(())) => TokenKind::Error,
            None => {
                // non-empty rest always yields at least one classification
                unreachable!("classifier produced nothing for non-empty input")
            }
        };
        let end = classifier.span().end;
        if end == rest.len() && !final_chunk {
            // the token touches the unfinalized buffer end and may still grow
            return ParseResult::InputNeeded;
        }

        let text = rest[..end].to_string();
        let start = self.position;
        self.position.advance(&text);
        self.consumed += end;
        self.pending = Some(Token::new(kind, text, TextRange::new(start, self.position)));
        ParseResult::OutputAvailable
    }

    /// Take the single pending token.
    ///
    /// # Panics
    ///
    /// Panics when no output is pending; `parse` must have reported
    /// `OutputAvailable` first.
    pub fn read(&mut self) -> Token {
        match self.pending.take() {
            Some(token) => token,
            None => panic!("no token pending; parse() must report OutputAvailable first"),
        }
    }

    fn compact(&mut self) {
        if self.consumed >= COMPACT_THRESHOLD {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Lexer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the lexer over a fully buffered input.
    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        lexer.push_chunk(source);
        let mut out = Vec::new();
        loop {
            match lexer.parse(true) {
                ParseResult::OutputAvailable => out.push(lexer.read()),
                ParseResult::Eof => break,
                other => panic!("unexpected state {:?}", other),
            }
        }
        out
    }

    #[test]
    fn test_empty_input_yields_only_eof() {
        let tokens = lex_all("");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_simple_statement() {
        let tokens = lex_all("doctype strict;");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Whitespace,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[0].text, "doctype");
        assert_eq!(tokens[2].text, "strict");
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = lex_all("a\nb");
        assert_eq!(tokens[0].range.start.line, 1);
        assert_eq!(tokens[2].range.start.line, 2);
        assert_eq!(tokens[2].range.start.column, 1);
    }

    #[test]
    fn test_token_withheld_at_chunk_boundary() {
        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        lexer.push_chunk("doc");
        // "doc" could be the prefix of a longer identifier
        assert_eq!(lexer.parse(false), ParseResult::InputNeeded);
        lexer.push_chunk("type ");
        assert_eq!(lexer.parse(false), ParseResult::OutputAvailable);
        let token = lexer.read();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.text, "doctype");
    }

    #[test]
    fn test_chunked_equals_whole() {
        let source = "grammar a.b \"1.0\" { token \"x\"; }\n";
        let whole = lex_all(source);

        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        let mut chunked = Vec::new();
        let mut fed = 0;
        let chars: Vec<char> = source.chars().collect();
        loop {
            match lexer.parse(fed >= chars.len()) {
                ParseResult::OutputAvailable => chunked.push(lexer.read()),
                ParseResult::InputNeeded => {
                    let chunk: String = chars[fed..(fed + 1).min(chars.len())].iter().collect();
                    fed += chunk.chars().count();
                    lexer.push_chunk(&chunk);
                }
                ParseResult::Eof => break,
                other => panic!("unexpected state {:?}", other),
            }
        }
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_unknown_character_becomes_error_token() {
        let tokens = lex_all("a \u{1F600} b");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Error));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    #[should_panic(expected = "no token pending")]
    fn test_read_without_output_panics() {
        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        lexer.read();
    }
}
