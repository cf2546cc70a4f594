//! Phrase parser: lexical tokens to block/statement structure.
//!
//! The phrase layer groups tokens into statements and `{}` blocks without
//! consulting any grammar. `{` emits a synthetic `StartBlock` marker
//! followed by the brace itself as `Control`; `}` emits the brace as
//! `Control` followed by a synthetic `EndBlock`. Explicit `;` separators
//! become `StatementEnd`; a significant token followed by a line break at
//! nesting depth zero ends the statement softly, unless a trailing operator
//! or an open parenthesis marks the line as continued. Blank lines and
//! comments pass through tagged `Ignorable` rather than being dropped, so
//! downstream consumers can reconstruct exact source formatting.
//!
//! Block imbalance is flagged, never silently repaired away: a `}` below
//! depth zero and a block left open at end of input both produce an
//! `EndBlock` carrying an error, keeping start/end counts equal in every
//! stream that reaches `Eof`.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::position::TextRange;
use crate::etl::protocol::ParseResult;
use crate::etl::tokens::{Token, TokenKind};
use serde::Serialize;
use std::collections::VecDeque;

/// Structural classification of one phrase event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhraseKind {
    /// A token grammar matching can see.
    SignificantToken,
    /// Whitespace, comments, blank lines; preserved but never matched.
    Ignorable,
    /// A structural token consumed by the phrase layer itself (`{`, `}`).
    Control,
    /// Statement ended by a line break at depth zero.
    SoftStatementEnd,
    /// Statement ended explicitly (`;`) or by block/input closure.
    StatementEnd,
    /// Synthetic marker before the `{` of a block.
    StartBlock,
    /// Synthetic marker after the `}` of a block.
    EndBlock,
    /// End of the phrase stream.
    Eof,
}

/// One phrase event, usually wrapping the originating lexical token.
///
/// Synthetic events (`StartBlock`, `EndBlock`, forced `StatementEnd`,
/// `Eof`) carry no token and an empty range at the point they were
/// produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhraseToken {
    pub kind: PhraseKind,
    pub token: Option<Token>,
    pub range: TextRange,
    pub error: Option<ErrorInfo>,
}

impl PhraseToken {
    fn wrapping(kind: PhraseKind, token: Token) -> Self {
        PhraseToken {
            kind,
            range: token.range,
            token: Some(token),
            error: None,
        }
    }

    fn synthetic(kind: PhraseKind, range: TextRange) -> Self {
        PhraseToken {
            kind,
            token: None,
            range,
            error: None,
        }
    }

    fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Pull-driven phrase parser.
pub struct PhraseParser {
    system_id: String,
    /// Statement-open flag per nesting level; index 0 is the top level.
    statement_open: Vec<bool>,
    paren_depth: u32,
    /// Last significant token ends a continuation (`=`, `,`, ...).
    continuation_pending: bool,
    queue: VecDeque<PhraseToken>,
    pending: Option<PhraseToken>,
    finished: bool,
}

impl PhraseParser {
    pub fn new() -> Self {
        PhraseParser {
            system_id: String::new(),
            statement_open: vec![false],
            paren_depth: 0,
            continuation_pending: false,
            queue: VecDeque::new(),
            pending: None,
            finished: false,
        }
    }

    /// Reset for a new logical input.
    pub fn start(&mut self, system_id: &str) {
        self.system_id = system_id.to_string();
        self.statement_open.clear();
        self.statement_open.push(false);
        self.paren_depth = 0;
        self.continuation_pending = false;
        self.queue.clear();
        self.pending = None;
        self.finished = false;
    }

    fn depth(&self) -> usize {
        self.statement_open.len() - 1
    }

    /// Advance until one phrase token is pending, more lexical input is
    /// needed, or the stream is exhausted. Input is pulled from `input`;
    /// `tokens_finished` tells the parser the cell will not fill again.
    pub fn parse(&mut self, input: &mut Cell<Token>, tokens_finished: bool) -> ParseResult {
        loop {
            if self.pending.is_some() {
                return ParseResult::OutputAvailable;
            }
            if let Some(queued) = self.queue.pop_front() {
                self.pending = Some(queued);
                return ParseResult::OutputAvailable;
            }
            if self.finished {
                return ParseResult::Eof;
            }
            if !input.has_element() {
                if tokens_finished {
                    // the lexer always closes with an Eof token; reaching
                    // here means the driver dropped it, so close anyway
                    let range = TextRange::at(crate::etl::position::Position::start());
                    self.close_stream(range);
                    continue;
                }
                return ParseResult::InputNeeded;
            }
            let token = input.take();
            self.consume(token);
        }
    }

    /// Take the single pending phrase token.
    ///
    /// # Panics
    ///
    /// Panics when no output is pending.
    pub fn read(&mut self) -> PhraseToken {
        match self.pending.take() {
            Some(token) => token,
            None => panic!("no phrase token pending; parse() must report OutputAvailable first"),
        }
    }

    fn consume(&mut self, token: Token) {
        match token.kind {
            TokenKind::Eof => {
                let range = token.range;
                self.close_stream(range);
            }
            kind if kind.is_ignorable() => {
                if kind == TokenKind::Newline && self.soft_end_due() {
                    let open = self.statement_open.last_mut().expect("level stack");
                    *open = false;
                    self.queue
                        .push_back(PhraseToken::wrapping(PhraseKind::SoftStatementEnd, token));
                } else {
                    self.queue
                        .push_back(PhraseToken::wrapping(PhraseKind::Ignorable, token));
                }
            }
            TokenKind::Semicolon => {
                *self.statement_open.last_mut().expect("level stack") = false;
                self.continuation_pending = false;
                self.queue
                    .push_back(PhraseToken::wrapping(PhraseKind::StatementEnd, token));
            }
            TokenKind::OpenBrace => {
                *self.statement_open.last_mut().expect("level stack") = true;
                self.continuation_pending = false;
                self.queue.push_back(PhraseToken::synthetic(
                    PhraseKind::StartBlock,
                    TextRange::at(token.range.start),
                ));
                self.queue
                    .push_back(PhraseToken::wrapping(PhraseKind::Control, token));
                self.statement_open.push(false);
            }
            TokenKind::CloseBrace => {
                if self.depth() == 0 {
                    // unmatched close; flag it but keep the stream going
                    let error = ErrorInfo::new(
                        codes::UNBALANCED_BLOCK,
                        vec!["}".into()],
                        SourceLocation::new(&self.system_id, token.range.start),
                    );
                    let end_range = TextRange::at(token.range.end);
                    self.queue
                        .push_back(PhraseToken::wrapping(PhraseKind::Control, token));
                    self.queue.push_back(
                        PhraseToken::synthetic(PhraseKind::EndBlock, end_range).with_error(error),
                    );
                    return;
                }
                if self.statement_open.pop().expect("level stack") {
                    self.queue.push_back(PhraseToken::synthetic(
                        PhraseKind::StatementEnd,
                        TextRange::at(token.range.start),
                    ));
                }
                let end_range = TextRange::at(token.range.end);
                self.queue
                    .push_back(PhraseToken::wrapping(PhraseKind::Control, token));
                self.queue
                    .push_back(PhraseToken::synthetic(PhraseKind::EndBlock, end_range));
                self.continuation_pending = false;
            }
            _ => {
                // significant content, including lexical error tokens
                *self.statement_open.last_mut().expect("level stack") = true;
                match token.kind {
                    TokenKind::OpenParen | TokenKind::OpenBracket => self.paren_depth += 1,
                    TokenKind::CloseParen | TokenKind::CloseBracket => {
                        self.paren_depth = self.paren_depth.saturating_sub(1)
                    }
                    _ => {}
                }
                self.continuation_pending =
                    matches!(token.kind, TokenKind::Graphics | TokenKind::Comma);
                let mut phrase = PhraseToken::wrapping(PhraseKind::SignificantToken, token);
                if phrase.token.as_ref().map(|t| t.kind) == Some(TokenKind::Error) {
                    let error = ErrorInfo::new(
                        codes::UNEXPECTED_CHARACTER,
                        vec![phrase.token.as_ref().map(|t| t.text.clone()).unwrap_or_default()],
                        SourceLocation::new(&self.system_id, phrase.range.start),
                    );
                    phrase = phrase.with_error(error);
                }
                self.queue.push_back(phrase);
            }
        }
    }

    /// Close open statements and blocks at end of input, then emit `Eof`.
    fn close_stream(&mut self, range: TextRange) {
        while self.depth() > 0 {
            if self.statement_open.pop().expect("level stack") {
                self.queue
                    .push_back(PhraseToken::synthetic(PhraseKind::StatementEnd, range));
            }
            let error = ErrorInfo::new(
                codes::UNCLOSED_BLOCK,
                vec![],
                SourceLocation::new(&self.system_id, range.start),
            );
            self.queue
                .push_back(PhraseToken::synthetic(PhraseKind::EndBlock, range).with_error(error));
        }
        if self.statement_open.pop().expect("level stack") {
            self.queue
                .push_back(PhraseToken::synthetic(PhraseKind::StatementEnd, range));
        }
        self.statement_open.push(false);
        self.queue
            .push_back(PhraseToken::synthetic(PhraseKind::Eof, range));
        self.finished = true;
    }

    fn soft_end_due(&self) -> bool {
        self.depth() == 0
            && self.paren_depth == 0
            && !self.continuation_pending
            && *self.statement_open.last().expect("level stack")
    }
}

impl Default for PhraseParser {
    fn default() -> Self {
        PhraseParser::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::lexer::Lexer;
    use crate::etl::position::Position;

    /// Run lexer and phrase parser over a whole source string.
    pub(crate) fn phrase_all(source: &str) -> Vec<PhraseToken> {
        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        lexer.push_chunk(source);
        let mut parser = PhraseParser::new();
        parser.start("test:input");
        let mut cell = Cell::new();
        let mut out = Vec::new();
        loop {
            match parser.parse(&mut cell, true) {
                ParseResult::OutputAvailable => out.push(parser.read()),
                ParseResult::InputNeeded => match lexer.parse(true) {
                    ParseResult::OutputAvailable => cell.put(lexer.read()),
                    ParseResult::Eof => {}
                    other => panic!("unexpected lexer state {:?}", other),
                },
                ParseResult::Eof => break,
                other => panic!("unexpected phrase state {:?}", other),
            }
        }
        out
    }

    fn kinds(source: &str) -> Vec<PhraseKind> {
        phrase_all(source).into_iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_empty_input_is_just_eof() {
        assert_eq!(kinds(""), vec![PhraseKind::Eof]);
    }

    #[test]
    fn test_braces_produce_block_markers() {
        assert_eq!(
            kinds("{}"),
            vec![
                PhraseKind::StartBlock,
                PhraseKind::Control,
                PhraseKind::Control,
                PhraseKind::EndBlock,
                PhraseKind::StatementEnd,
                PhraseKind::Eof,
            ]
        );
    }

    #[test]
    fn test_nested_blocks_match_in_order() {
        assert_eq!(
            kinds("{{;};}"),
            vec![
                PhraseKind::StartBlock,
                PhraseKind::Control,
                PhraseKind::StartBlock,
                PhraseKind::Control,
                PhraseKind::StatementEnd,
                PhraseKind::Control,
                PhraseKind::EndBlock,
                PhraseKind::StatementEnd,
                PhraseKind::Control,
                PhraseKind::EndBlock,
                PhraseKind::StatementEnd,
                PhraseKind::Eof,
            ]
        );
    }

    #[test]
    fn test_soft_statement_end_on_newline() {
        assert_eq!(
            kinds("a\nb"),
            vec![
                PhraseKind::SignificantToken,
                PhraseKind::SoftStatementEnd,
                PhraseKind::SignificantToken,
                PhraseKind::StatementEnd,
                PhraseKind::Eof,
            ]
        );
    }

    #[test]
    fn test_trailing_operator_continues_statement() {
        assert_eq!(
            kinds("a =\nb"),
            vec![
                PhraseKind::SignificantToken,
                PhraseKind::Ignorable,
                PhraseKind::SignificantToken,
                PhraseKind::Ignorable,
                PhraseKind::SignificantToken,
                PhraseKind::StatementEnd,
                PhraseKind::Eof,
            ]
        );
    }

    #[test]
    fn test_newline_inside_parens_is_ignorable() {
        let out = kinds("f(\na)\n");
        assert!(!out[..out.len() - 2].contains(&PhraseKind::SoftStatementEnd));
    }

    #[test]
    fn test_unmatched_close_is_flagged() {
        let tokens = phrase_all("}");
        let end_block = tokens
            .iter()
            .find(|t| t.kind == PhraseKind::EndBlock)
            .expect("end block");
        assert!(end_block.has_error());
    }

    #[test]
    fn test_unclosed_open_is_flagged_and_balanced() {
        let tokens = phrase_all("{");
        let starts = tokens
            .iter()
            .filter(|t| t.kind == PhraseKind::StartBlock)
            .count();
        let ends: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == PhraseKind::EndBlock)
            .collect();
        assert_eq!(starts, ends.len());
        assert!(ends[0].has_error());
    }

    #[test]
    fn test_comments_pass_through_as_ignorable() {
        let out = kinds("// note\na;");
        assert_eq!(out[0], PhraseKind::Ignorable);
    }

    #[test]
    fn test_blank_lines_do_not_end_statements_twice() {
        assert_eq!(
            kinds("a\n\n"),
            vec![
                PhraseKind::SignificantToken,
                PhraseKind::SoftStatementEnd,
                PhraseKind::Ignorable,
                PhraseKind::Eof,
            ]
        );
    }
}
