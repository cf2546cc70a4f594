//! Pipeline driver: character chunks in, term tokens out.
//!
//! Wires the three stages over single-slot cells and exposes the same pull
//! protocol outward: the top-level loop satisfies each stage's
//! `InputNeeded` by stepping the stage beneath it, so one `parse` call on
//! the pipeline advances whichever stage can make progress.
//!
//! A document opens either with a `doctype` prologue naming its grammar or
//! with anything else, in which case the default dialect applies. The
//! driver buffers phrase tokens only until the first significant one to
//! make that choice, parses the prologue with the doctype grammar, and
//! then switches the term parser to the document's own grammar. With a
//! resolver attached the switch happens inline; without one the pipeline
//! reports `ResourceNeeded` and waits for [`TermPipeline::provide`] or
//! [`TermPipeline::fail`], which is how the resource-request protocol of
//! the term stage surfaces to callers.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::grammar::bootstrap::BootstrapSet;
use crate::etl::grammar::CompiledGrammar;
use crate::etl::lexer::Lexer;
use crate::etl::phrase::{PhraseKind, PhraseParser, PhraseToken};
use crate::etl::position::{Position, TextRange};
use crate::etl::protocol::ParseResult;
use crate::etl::resolver::GrammarResolver;
use crate::etl::resource::{ResourceReference, ResourceRequest};
use crate::etl::term::{TermKind, TermParser, TermToken};
use crate::etl::tokens::{Token, TokenKind};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Buffering phrase tokens until the first significant one.
    Detecting,
    /// Parsing the `doctype` statement with the doctype grammar.
    Prologue,
    /// Waiting for the document grammar to be supplied.
    AwaitGrammar,
    /// Parsing the document body.
    Body,
}

/// What a `doctype` prologue declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctypeInfo {
    pub name: String,
    pub version: Option<String>,
    pub system_id: Option<String>,
    pub context: Option<String>,
}

impl DoctypeInfo {
    /// The resource request this prologue stands for.
    pub fn to_request(&self, requesting_context: &str) -> ResourceRequest {
        let public_id = match &self.version {
            Some(version) => format!("{} {}", self.name, version),
            None => self.name.clone(),
        };
        ResourceRequest::new(
            ResourceReference::new(self.system_id.clone(), Some(public_id)),
            requesting_context,
        )
    }
}

enum Pump {
    Produced(PhraseToken),
    NeedInput,
    Done,
}

/// The whole pipeline behind one pull surface.
pub struct TermPipeline<'a> {
    system_id: String,
    lexer: Lexer,
    phrases: PhraseParser,
    term: TermParser,
    token_cell: Cell<Token>,
    phrase_cell: Cell<PhraseToken>,
    lookahead: VecDeque<PhraseToken>,
    out: VecDeque<TermToken>,
    mode: Mode,
    resolver: Option<&'a GrammarResolver>,
    bootstrap: Arc<BootstrapSet>,
    prologue_events: Vec<TermToken>,
    pending_request: Option<ResourceRequest>,
    lexer_done: bool,
    phrase_done: bool,
    finished: bool,
}

impl<'a> TermPipeline<'a> {
    /// Document-mode pipeline without a resolver; a doctype prologue makes
    /// `parse` report `ResourceNeeded`.
    pub fn new(system_id: &str) -> Self {
        Self::build(system_id, None)
    }

    /// Document-mode pipeline resolving doctype grammars through
    /// `resolver`.
    pub fn with_resolver(system_id: &str, resolver: &'a GrammarResolver) -> Self {
        Self::build(system_id, Some(resolver))
    }

    fn build(system_id: &str, resolver: Option<&'a GrammarResolver>) -> Self {
        let mut lexer = Lexer::new();
        lexer.start(system_id, Position::start());
        let mut phrases = PhraseParser::new();
        phrases.start(system_id);
        TermPipeline {
            system_id: system_id.to_string(),
            lexer,
            phrases,
            term: TermParser::new(),
            token_cell: Cell::new(),
            phrase_cell: Cell::new(),
            lookahead: VecDeque::new(),
            out: VecDeque::new(),
            mode: Mode::Detecting,
            resolver,
            bootstrap: BootstrapSet::shared(),
            prologue_events: Vec::new(),
            pending_request: None,
            lexer_done: false,
            phrase_done: false,
            finished: false,
        }
    }

    /// Pipeline over one fixed grammar; no doctype switching.
    pub fn with_grammar(
        system_id: &str,
        grammar: Arc<CompiledGrammar>,
        context: Option<&str>,
    ) -> Result<Self, ErrorInfo> {
        let mut pipeline = Self::build(system_id, None);
        pipeline.term.start(system_id, grammar, context)?;
        pipeline.mode = Mode::Body;
        Ok(pipeline)
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        self.lexer.push_chunk(chunk);
    }

    /// The outstanding grammar request while `parse` reports
    /// `ResourceNeeded`.
    pub fn request(&self) -> Option<&ResourceRequest> {
        self.pending_request.as_ref()
    }

    /// Supply the document grammar for the outstanding request.
    pub fn provide(&mut self, grammar: Arc<CompiledGrammar>, context: Option<&str>) {
        assert!(
            self.mode == Mode::AwaitGrammar,
            "no grammar request is outstanding"
        );
        self.pending_request = None;
        self.install_body_grammar(grammar, context.map(|c| c.to_string()));
    }

    /// Report that the document grammar could not be resolved; the body
    /// falls back to the default dialect and the failure is flagged in the
    /// stream.
    pub fn fail(&mut self, error: ErrorInfo) {
        assert!(
            self.mode == Mode::AwaitGrammar,
            "no grammar request is outstanding"
        );
        self.pending_request = None;
        self.flag_and_fall_back(error);
    }

    /// Advance until one term token is pending, more character input is
    /// needed, a grammar must be supplied, or the stream is exhausted.
    pub fn parse(&mut self, final_chunk: bool) -> ParseResult {
        loop {
            if !self.out.is_empty() {
                return ParseResult::OutputAvailable;
            }
            if self.finished {
                return ParseResult::Eof;
            }
            match self.mode {
                Mode::Detecting => match self.pump_phrase(final_chunk) {
                    Pump::Produced(phrase) => self.detect(phrase),
                    Pump::NeedInput => return ParseResult::InputNeeded,
                    Pump::Done => {
                        self.choose_body_grammar(None);
                    }
                },
                Mode::AwaitGrammar => return ParseResult::ResourceNeeded,
                Mode::Prologue | Mode::Body => {
                    let term_input_done =
                        self.phrase_done && self.lookahead.is_empty() && !self.phrase_cell.has_element();
                    match self.term.parse(&mut self.phrase_cell, term_input_done) {
                        ParseResult::OutputAvailable => {
                            let event = self.term.read();
                            let ends_prologue = self.mode == Mode::Prologue
                                && event.kind == TermKind::StatementEnd;
                            if self.mode == Mode::Prologue {
                                self.prologue_events.push(event.clone());
                            }
                            self.out.push_back(event);
                            if ends_prologue {
                                self.switch_to_body();
                            }
                        }
                        ParseResult::InputNeeded => {
                            if let Some(phrase) = self.lookahead.pop_front() {
                                self.phrase_cell.put(phrase);
                                continue;
                            }
                            match self.pump_phrase(final_chunk) {
                                Pump::Produced(phrase) => self.phrase_cell.put(phrase),
                                Pump::NeedInput => return ParseResult::InputNeeded,
                                Pump::Done => {}
                            }
                        }
                        ParseResult::Eof => self.finished = true,
                        ParseResult::ResourceNeeded => {
                            unreachable!("term parser does not request resources directly")
                        }
                    }
                }
            }
        }
    }

    /// Take the single pending term token.
    ///
    /// # Panics
    ///
    /// Panics when no output is pending.
    pub fn read(&mut self) -> TermToken {
        match self.out.pop_front() {
            Some(token) => token,
            None => panic!("no term token pending; parse() must report OutputAvailable first"),
        }
    }

    /// Convenience for whole-string inputs: feed `source`, drive to end,
    /// collect every term token.
    ///
    /// # Panics
    ///
    /// Panics if a grammar request surfaces and no resolver is attached.
    pub fn run_to_end(&mut self, source: &str) -> Vec<TermToken> {
        self.push_chunk(source);
        let mut tokens = Vec::new();
        loop {
            match self.parse(true) {
                ParseResult::OutputAvailable => tokens.push(self.read()),
                ParseResult::Eof => return tokens,
                ParseResult::ResourceNeeded => {
                    panic!("grammar request with no resolver attached; use with_resolver")
                }
                ParseResult::InputNeeded => {
                    panic!("pipeline asked for input after the final chunk")
                }
            }
        }
    }

    /// Step the phrase parser once, stepping the lexer beneath it as
    /// needed.
    fn pump_phrase(&mut self, final_chunk: bool) -> Pump {
        loop {
            match self.phrases.parse(&mut self.token_cell, self.lexer_done) {
                ParseResult::OutputAvailable => return Pump::Produced(self.phrases.read()),
                ParseResult::InputNeeded => match self.lexer.parse(final_chunk) {
                    ParseResult::OutputAvailable => self.token_cell.put(self.lexer.read()),
                    ParseResult::InputNeeded => return Pump::NeedInput,
                    ParseResult::Eof => self.lexer_done = true,
                    ParseResult::ResourceNeeded => {
                        unreachable!("lexer does not request resources")
                    }
                },
                ParseResult::Eof => {
                    self.phrase_done = true;
                    return Pump::Done;
                }
                ParseResult::ResourceNeeded => {
                    unreachable!("phrase parser does not request resources")
                }
            }
        }
    }

    /// Buffer phrase tokens until the first significant one decides the
    /// opening grammar.
    fn detect(&mut self, phrase: PhraseToken) {
        let decisive = phrase.kind != PhraseKind::Ignorable;
        let opens_doctype = phrase.kind == PhraseKind::SignificantToken
            && phrase.token.as_ref().map(|t| t.text.as_str()) == Some("doctype");
        self.lookahead.push_back(phrase);
        if !decisive {
            return;
        }
        if opens_doctype {
            let doctype = self.bootstrap.doctype();
            self.term
                .start(&self.system_id, doctype, None)
                .expect("bootstrap doctype grammar is usable");
            self.mode = Mode::Prologue;
        } else {
            self.choose_body_grammar(None);
        }
    }

    /// Enter body mode with the default dialect.
    fn choose_body_grammar(&mut self, context: Option<String>) {
        let dialect = self.bootstrap.default_dialect();
        self.term
            .start(&self.system_id, dialect, context.as_deref())
            .expect("bootstrap default dialect is usable");
        self.mode = Mode::Body;
    }

    /// The prologue statement just ended; line up the document grammar.
    fn switch_to_body(&mut self) {
        let info = doctype_info(&self.prologue_events);
        let request = info
            .as_ref()
            .map(|info| info.to_request(&self.system_id));
        let context = info.and_then(|info| info.context);
        match request {
            None => self.choose_body_grammar(None),
            Some(request) => match self.resolver {
                Some(resolver) => {
                    let resolved = resolver.resolve(request);
                    self.install_body_grammar(Arc::clone(&resolved.object), context);
                }
                None => {
                    self.pending_request = Some(request);
                    self.mode = Mode::AwaitGrammar;
                }
            },
        }
    }

    fn install_body_grammar(&mut self, grammar: Arc<CompiledGrammar>, context: Option<String>) {
        if !grammar.is_usable() {
            let mut error = ErrorInfo::new(
                codes::IMPORT_FAILED,
                vec![format!("document grammar {} is unusable", grammar.id)],
                SourceLocation::new(&self.system_id, Position::start()),
            );
            if let Some(first) = grammar.errors.first() {
                error = error.with_cause(first.clone());
            }
            self.flag_and_fall_back(error);
            return;
        }
        match self
            .term
            .start(&self.system_id, Arc::clone(&grammar), context.as_deref())
        {
            Ok(()) => self.mode = Mode::Body,
            Err(error) => self.flag_and_fall_back(error),
        }
    }

    /// Flag a fatal grammar problem in the stream and parse the rest with
    /// the default dialect so the stream still reaches a balanced end.
    fn flag_and_fall_back(&mut self, error: ErrorInfo) {
        let range = TextRange::at(Position::start());
        self.out.push_back(TermToken {
            kind: TermKind::SyntaxError,
            name: None,
            token: None,
            errors: vec![error],
            range,
        });
        self.choose_body_grammar(None);
    }
}

/// Read the prologue's term events back into a [`DoctypeInfo`].
pub fn doctype_info(events: &[TermToken]) -> Option<DoctypeInfo> {
    let significant: Vec<(TermKind, &Token)> = events
        .iter()
        .filter(|e| matches!(e.kind, TermKind::Value | TermKind::Structural))
        .filter_map(|e| e.token.as_ref().map(|t| (e.kind, t)))
        .collect();

    let mut index = 0;
    let at = |i: usize| significant.get(i);
    match at(index) {
        Some((TermKind::Structural, token)) if token.text == "doctype" => index += 1,
        _ => return None,
    }

    // a mode keyword only when another identifier follows it
    if let Some((TermKind::Value, token)) = at(index) {
        if (token.text == "strict" || token.text == "lax")
            && matches!(at(index + 1), Some((_, next)) if next.kind == TokenKind::Identifier)
        {
            index += 1;
        }
    }

    let mut name = match at(index) {
        Some((TermKind::Value, token)) if token.kind == TokenKind::Identifier => {
            index += 1;
            token.text.clone()
        }
        _ => return None,
    };
    while let (Some((TermKind::Structural, dot)), Some((TermKind::Value, part))) =
        (at(index), at(index + 1))
    {
        if dot.text != "." || part.kind != TokenKind::Identifier {
            break;
        }
        name.push('.');
        name.push_str(&part.text);
        index += 2;
    }

    let mut version = None;
    if let Some((TermKind::Value, token)) = at(index) {
        if token.kind == TokenKind::String {
            version = Some(crate::etl::grammar::compiler::unquote(&token.text));
            index += 1;
        }
    }

    let mut system_id = None;
    if let Some((TermKind::Structural, token)) = at(index) {
        if token.text == "system" {
            if let Some((TermKind::Value, value)) = at(index + 1) {
                if value.kind == TokenKind::String {
                    system_id = Some(crate::etl::grammar::compiler::unquote(&value.text));
                    index += 2;
                }
            }
        }
    }

    let mut context = None;
    if let Some((TermKind::Structural, token)) = at(index) {
        if token.text == "context" {
            if let Some((TermKind::Value, value)) = at(index + 1) {
                if value.kind == TokenKind::Identifier {
                    context = Some(value.text.clone());
                }
            } else if let (Some((TermKind::Structural, eq)), Some((TermKind::Value, value))) =
                (at(index + 1), at(index + 2))
            {
                if eq.text == "=" && value.kind == TokenKind::Identifier {
                    context = Some(value.text.clone());
                }
            }
        }
    }

    Some(DoctypeInfo {
        name,
        version,
        system_id,
        context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dialect_for_plain_document() {
        let mut pipeline = TermPipeline::new("test:doc");
        let tokens = pipeline.run_to_end("a b;\n");
        assert_eq!(tokens.last().unwrap().kind, TermKind::Eof);
        let values: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TermKind::Value)
            .filter_map(|t| t.text())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_document_yields_eof() {
        let mut pipeline = TermPipeline::new("test:doc");
        let tokens = pipeline.run_to_end("");
        let kinds: Vec<TermKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TermKind::Eof]);
    }

    #[test]
    fn test_doctype_without_resolver_reports_resource_needed() {
        let mut pipeline = TermPipeline::new("test:doc");
        pipeline.push_chunk("doctype strict My.Grammar \"1.0\";\n");
        let mut saw_request = false;
        loop {
            match pipeline.parse(true) {
                ParseResult::OutputAvailable => {
                    pipeline.read();
                }
                ParseResult::ResourceNeeded => {
                    let request = pipeline.request().expect("outstanding request");
                    assert_eq!(
                        request.reference.public_id.as_deref(),
                        Some("My.Grammar 1.0")
                    );
                    saw_request = true;
                    pipeline.fail(ErrorInfo::new(
                        crate::etl::errors::codes::RESOURCE_UNREADABLE,
                        vec![],
                        SourceLocation::new("test:doc", Position::start()),
                    ));
                }
                ParseResult::Eof => break,
                ParseResult::InputNeeded => panic!("input after final chunk"),
            }
        }
        assert!(saw_request);
    }

    #[test]
    fn test_doctype_info_full_prologue() {
        let mut pipeline = TermPipeline::new("test:doc");
        pipeline.push_chunk("doctype strict ETL.Grammar \"0.3.0\" context = Grammar;\n");
        // collect prologue events until the request surfaces
        loop {
            match pipeline.parse(true) {
                ParseResult::OutputAvailable => {
                    pipeline.read();
                }
                ParseResult::ResourceNeeded => break,
                other => panic!("unexpected state {:?}", other),
            }
        }
        let request = pipeline.request().expect("outstanding request").clone();
        assert_eq!(
            request.reference.public_id.as_deref(),
            Some("ETL.Grammar 0.3.0")
        );
        pipeline.fail(ErrorInfo::new(
            crate::etl::errors::codes::RESOURCE_UNREADABLE,
            vec![],
            SourceLocation::new("test:doc", Position::start()),
        ));
    }
}
