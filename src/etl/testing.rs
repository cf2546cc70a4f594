//! Helpers for exercising the pipeline in tests.
//!
//! Everything here is plain library code so integration tests and unit
//! tests share the same drivers instead of each reinventing the stepping
//! loop.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::lexer::Lexer;
use crate::etl::phrase::{PhraseParser, PhraseToken};
use crate::etl::position::Position;
use crate::etl::protocol::ParseResult;
use crate::etl::resolver::{OpenedResource, ResourceOpener};
use crate::etl::resource::ResourceReference;
use crate::etl::tokens::Token;
use std::collections::HashMap;

/// Opener over a fixed in-memory table keyed by identity.
pub struct MemoryOpener {
    entries: HashMap<String, String>,
}

impl MemoryOpener {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        MemoryOpener {
            entries: entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }
}

impl ResourceOpener for MemoryOpener {
    fn open(&self, reference: &ResourceReference) -> Result<OpenedResource, ErrorInfo> {
        let key = reference.identity();
        match self.entries.get(key) {
            Some(text) => Ok(OpenedResource {
                system_id: key.to_string(),
                text: text.clone(),
            }),
            None => Err(ErrorInfo::new(
                codes::RESOURCE_UNREADABLE,
                vec![key.to_string()],
                SourceLocation::new(key, Position::start()),
            )),
        }
    }
}

/// Run the lexer over a whole source string.
pub fn lex_source(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new();
    lexer.start("test:input", Position::start());
    lexer.push_chunk(source);
    let mut tokens = Vec::new();
    loop {
        match lexer.parse(true) {
            ParseResult::OutputAvailable => tokens.push(lexer.read()),
            ParseResult::Eof => return tokens,
            other => panic!("unexpected lexer state {:?}", other),
        }
    }
}

/// Run lexer and phrase parser over a whole source string.
pub fn phrase_source(source: &str) -> Vec<PhraseToken> {
    let mut lexer = Lexer::new();
    lexer.start("test:input", Position::start());
    lexer.push_chunk(source);
    let mut phrases = PhraseParser::new();
    phrases.start("test:input");
    let mut cell = Cell::new();
    let mut out = Vec::new();
    loop {
        match phrases.parse(&mut cell, true) {
            ParseResult::OutputAvailable => out.push(phrases.read()),
            ParseResult::InputNeeded => match lexer.parse(true) {
                ParseResult::OutputAvailable => cell.put(lexer.read()),
                ParseResult::Eof => {}
                other => panic!("unexpected lexer state {:?}", other),
            },
            ParseResult::Eof => return out,
            other => panic!("unexpected phrase state {:?}", other),
        }
    }
}
