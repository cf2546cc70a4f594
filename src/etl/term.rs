//! Term parser: phrase tokens to grammar-defined structural events.
//!
//! This is the only grammar-specific pipeline stage. It interprets the
//! compiled grammar's flat state table: each step matches the next phrase
//! token against the current state's transitions, emits the transition's
//! events, and moves on. Production calls push interpreter frames through
//! the grammar's call-site arena, so mutual and self recursion cost one
//! frame per active call and nothing else.
//!
//! The stage honors the single-pending-output contract by queueing the
//! events of the fired transition and handing them out one `read` at a
//! time. Start/end events are tracked on a scope stack; a conforming
//! stream is always balanced, and the parser itself closes whatever a
//! syntax error interrupted.
//!
//! When no transition matches, the parser emits a `SyntaxError` event and
//! resynchronizes: input is skipped (and passed through as ignorable, so
//! nothing is lost) up to the next statement boundary at the current block
//! depth, open scopes are closed down to the interrupted statement, and
//! interpretation resumes at the owning context's statement loop.
//! Recoverable errors never stop the stream; only resource and
//! compile-time failures do.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::grammar::{CallTarget, CompiledGrammar, EmitOp, Matcher, Next, Transition};
use crate::etl::phrase::{PhraseKind, PhraseToken};
use crate::etl::position::{Position, TextRange};
use crate::etl::protocol::ParseResult;
use crate::etl::tokens::{Token, TokenKind};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Structural-event classification of one term token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TermKind {
    StatementStart,
    StatementEnd,
    ObjectStart,
    ObjectEnd,
    PropertyStart,
    PropertyEnd,
    ListPropertyStart,
    ListPropertyEnd,
    Value,
    Structural,
    Modifier,
    DocCommentStart,
    DocCommentEnd,
    Ignorable,
    Control,
    SyntaxError,
    Eof,
}

impl TermKind {
    /// Whether this kind opens a scope that a matching end kind closes.
    pub fn is_start(self) -> bool {
        matches!(
            self,
            TermKind::StatementStart
                | TermKind::ObjectStart
                | TermKind::PropertyStart
                | TermKind::ListPropertyStart
                | TermKind::DocCommentStart
        )
    }

    pub fn is_end(self) -> bool {
        matches!(
            self,
            TermKind::StatementEnd
                | TermKind::ObjectEnd
                | TermKind::PropertyEnd
                | TermKind::ListPropertyEnd
                | TermKind::DocCommentEnd
        )
    }
}

/// The output unit of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermToken {
    pub kind: TermKind,
    /// Object/property/list name for start and end events.
    pub name: Option<String>,
    /// The lexical token this event carries, when there is one.
    pub token: Option<Token>,
    pub errors: Vec<ErrorInfo>,
    pub range: TextRange,
}

impl TermToken {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Raw text of the carried token, if any.
    pub fn text(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.text.as_str())
    }
}

#[derive(Debug)]
struct Frame {
    grammar: Arc<CompiledGrammar>,
    state: usize,
    scope_base: usize,
}

#[derive(Debug, Clone)]
enum ScopeKind {
    Statement,
    Object(String),
    Property(String),
    List(String),
}

#[derive(Debug)]
struct Recovery {
    depth: u32,
}

/// Pull-driven, table-interpreting term parser.
pub struct TermParser {
    system_id: String,
    frames: Vec<Frame>,
    scopes: Vec<ScopeKind>,
    queue: VecDeque<TermToken>,
    pending: Option<TermToken>,
    recovery: Option<Recovery>,
    doc_open: bool,
    finished: bool,
    last_position: Position,
}

impl TermParser {
    pub fn new() -> Self {
        TermParser {
            system_id: String::new(),
            frames: Vec::new(),
            scopes: Vec::new(),
            queue: VecDeque::new(),
            pending: None,
            recovery: None,
            doc_open: false,
            finished: false,
            last_position: Position::start(),
        }
    }

    /// Reset for a new logical input, interpreting `grammar` starting in
    /// `context` (the grammar's default context when `None`).
    ///
    /// Fails when the grammar is unusable or the context is unknown; an
    /// unusable grammar must never drive parsing.
    pub fn start(
        &mut self,
        system_id: &str,
        grammar: Arc<CompiledGrammar>,
        context: Option<&str>,
    ) -> Result<(), ErrorInfo> {
        if !grammar.is_usable() {
            let mut error = ErrorInfo::new(
                codes::MALFORMED_GRAMMAR_SOURCE,
                vec![format!("grammar {} is unusable", grammar.id)],
                SourceLocation::new(system_id, Position::start()),
            );
            if let Some(first) = grammar.errors.first() {
                error = error.with_cause(first.clone());
            }
            return Err(error);
        }
        let context_name = context.unwrap_or(&grammar.default_context);
        let entry = grammar.entry(context_name).ok_or_else(|| {
            ErrorInfo::new(
                codes::UNKNOWN_CONTEXT,
                vec![context_name.to_string()],
                SourceLocation::new(system_id, Position::start()),
            )
        })?;
        self.system_id = system_id.to_string();
        self.frames.clear();
        self.frames.push(Frame {
            grammar,
            state: entry,
            scope_base: 0,
        });
        self.scopes.clear();
        self.queue.clear();
        self.pending = None;
        self.recovery = None;
        self.doc_open = false;
        self.finished = false;
        self.last_position = Position::start();
        Ok(())
    }

    /// Advance until one term token is pending, more phrase input is
    /// needed, or the stream is exhausted.
    pub fn parse(&mut self, input: &mut Cell<PhraseToken>, phrases_finished: bool) -> ParseResult {
        assert!(!self.frames.is_empty(), "term parser not started");
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
                if phrases_finished {
                    // the phrase parser always closes with Eof; reaching
                    // here means the driver dropped it
                    self.finish_stream(TextRange::at(self.last_position));
                    continue;
                }
                return ParseResult::InputNeeded;
            }

            if self.recovery.is_some() {
                self.step_recovery(input);
                continue;
            }

            match input.peek().kind {
                PhraseKind::Ignorable => {
                    let phrase = input.take();
                    self.consume_ignorable(phrase);
                }
                PhraseKind::Eof => {
                    if self.doc_open {
                        self.close_doc_comment();
                        continue;
                    }
                    let phrase = input.take();
                    self.finish_stream(phrase.range);
                }
                _ => {
                    if self.doc_open {
                        self.close_doc_comment();
                        continue;
                    }
                    self.step_table(input);
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
        match self.pending.take() {
            Some(token) => token,
            None => panic!("no term token pending; parse() must report OutputAvailable first"),
        }
    }

    fn consume_ignorable(&mut self, phrase: PhraseToken) {
        let is_doc = phrase.token.as_ref().map(|t| t.kind) == Some(TokenKind::DocComment);
        if is_doc && !self.doc_open && self.at_statement_level() {
            self.push_event(TermKind::DocCommentStart, None, None, vec![], phrase.range);
            self.doc_open = true;
        }
        self.track_position(&phrase);
        let errors = phrase.error.clone().into_iter().collect();
        self.push_event(TermKind::Ignorable, None, phrase.token, errors, phrase.range);
    }

    fn close_doc_comment(&mut self) {
        self.push_event(
            TermKind::DocCommentEnd,
            None,
            None,
            vec![],
            TextRange::at(self.last_position),
        );
        self.doc_open = false;
    }

    fn at_statement_level(&self) -> bool {
        let frame = self.frames.last().expect("frame stack");
        frame.grammar.states[frame.state].loop_state == frame.state
    }

    fn track_position(&mut self, phrase: &PhraseToken) {
        self.last_position = phrase.range.end;
    }

    fn step_table(&mut self, input: &mut Cell<PhraseToken>) {
        let transition = {
            let frame = self.frames.last().expect("frame stack");
            let state = &frame.grammar.states[frame.state];
            let peek = input.peek();
            state
                .transitions
                .iter()
                .find(|t| matcher_matches(&t.matcher, peek))
                .cloned()
        };
        let transition = match transition {
            Some(transition) => transition,
            None => {
                self.begin_recovery(input.peek());
                return;
            }
        };

        let consumed = if transition.consume {
            let phrase = input.take();
            self.track_position(&phrase);
            Some(phrase)
        } else {
            None
        };

        let token = consumed.as_ref().and_then(|p| p.token.clone());
        let errors: Vec<ErrorInfo> = consumed
            .as_ref()
            .and_then(|p| p.error.clone())
            .into_iter()
            .collect();
        let range = consumed
            .as_ref()
            .map(|p| p.range)
            .unwrap_or_else(|| TextRange::at(self.last_position));

        let mut errors_used = false;
        for (index, emit) in transition.emits.iter().enumerate() {
            let carried = if index == 0 {
                errors_used = true;
                errors.clone()
            } else {
                vec![]
            };
            self.apply_emit(emit, token.clone(), carried, range);
        }
        if !errors.is_empty() && !errors_used {
            // a consumed token's error must not be dropped silently
            self.push_event(TermKind::SyntaxError, None, token, errors, range);
        }

        self.apply_next(&transition, input);
    }

    fn apply_emit(
        &mut self,
        emit: &EmitOp,
        token: Option<Token>,
        errors: Vec<ErrorInfo>,
        range: TextRange,
    ) {
        match emit {
            EmitOp::StatementStart => {
                self.scopes.push(ScopeKind::Statement);
                self.push_event(TermKind::StatementStart, None, None, errors, range);
            }
            EmitOp::StatementEnd => {
                self.pop_scope();
                self.push_event(TermKind::StatementEnd, None, token, errors, range);
            }
            EmitOp::ObjectStart(name) => {
                self.scopes.push(ScopeKind::Object(name.clone()));
                self.push_event(
                    TermKind::ObjectStart,
                    Some(name.clone()),
                    None,
                    errors,
                    range,
                );
            }
            EmitOp::ObjectEnd(name) => {
                self.pop_scope();
                self.push_event(TermKind::ObjectEnd, Some(name.clone()), None, errors, range);
            }
            EmitOp::PropertyStart(name) => {
                self.scopes.push(ScopeKind::Property(name.clone()));
                self.push_event(
                    TermKind::PropertyStart,
                    Some(name.clone()),
                    None,
                    errors,
                    range,
                );
            }
            EmitOp::PropertyEnd(name) => {
                self.pop_scope();
                self.push_event(
                    TermKind::PropertyEnd,
                    Some(name.clone()),
                    None,
                    errors,
                    range,
                );
            }
            EmitOp::ListStart(name) => {
                self.scopes.push(ScopeKind::List(name.clone()));
                self.push_event(
                    TermKind::ListPropertyStart,
                    Some(name.clone()),
                    None,
                    errors,
                    range,
                );
            }
            EmitOp::ListEnd(name) => {
                self.pop_scope();
                self.push_event(
                    TermKind::ListPropertyEnd,
                    Some(name.clone()),
                    None,
                    errors,
                    range,
                );
            }
            EmitOp::Value => self.push_event(TermKind::Value, None, token, errors, range),
            EmitOp::Structural => {
                self.push_event(TermKind::Structural, None, token, errors, range)
            }
            EmitOp::Modifier => self.push_event(TermKind::Modifier, None, token, errors, range),
            EmitOp::Control => self.push_event(TermKind::Control, None, token, errors, range),
            EmitOp::Ignorable => self.push_event(TermKind::Ignorable, None, token, errors, range),
        }
    }

    fn pop_scope(&mut self) {
        debug_assert!(!self.scopes.is_empty(), "end event without open scope");
        self.scopes.pop();
    }

    fn apply_next(&mut self, transition: &Transition, input: &mut Cell<PhraseToken>) {
        match &transition.next {
            Next::State(index) => {
                self.frames.last_mut().expect("frame stack").state = *index;
            }
            Next::Call { site, return_to } => {
                let (grammar, entry) = {
                    let frame = self.frames.last().expect("frame stack");
                    match &frame.grammar.call_sites[*site].target {
                        CallTarget::Local(state) => (Arc::clone(&frame.grammar), *state),
                        CallTarget::External(grammar, state) => (Arc::clone(grammar), *state),
                        CallTarget::Pending(name) => {
                            // a usable grammar has every site bound
                            panic!("call site '{}' was never bound", name)
                        }
                    }
                };
                self.frames.last_mut().expect("frame stack").state = *return_to;
                self.frames.push(Frame {
                    grammar,
                    state: entry,
                    scope_base: self.scopes.len(),
                });
            }
            Next::Return => {
                if self.frames.len() > 1 {
                    self.frames.pop();
                } else {
                    // stray block closure at the outermost level: pass the
                    // token through, flagged when the phrase layer flagged it
                    let phrase = input.take();
                    self.track_position(&phrase);
                    let kind = if phrase.error.is_some() {
                        TermKind::SyntaxError
                    } else {
                        TermKind::Control
                    };
                    let errors = phrase.error.clone().into_iter().collect();
                    self.push_event(kind, None, phrase.token, errors, phrase.range);
                }
            }
        }
    }

    fn begin_recovery(&mut self, peek: &PhraseToken) {
        let offending = peek
            .token
            .as_ref()
            .map(|t| t.text.clone())
            .unwrap_or_else(|| format!("{:?}", peek.kind));
        let error = ErrorInfo::new(
            codes::UNEXPECTED_TOKEN,
            vec![offending],
            SourceLocation::new(&self.system_id, peek.range.start),
        );
        self.push_event(
            TermKind::SyntaxError,
            None,
            None,
            vec![error],
            TextRange::at(peek.range.start),
        );
        self.recovery = Some(Recovery { depth: 0 });
    }

    /// Skip to the next statement boundary at the depth the error occurred,
    /// passing skipped input through as ignorable.
    fn step_recovery(&mut self, input: &mut Cell<PhraseToken>) {
        let depth = self.recovery.as_ref().expect("recovery state").depth;
        match input.peek().kind {
            PhraseKind::Eof => {
                self.end_recovery(None);
            }
            PhraseKind::StartBlock => {
                self.recovery.as_mut().expect("recovery state").depth = depth + 1;
                self.skip_one(input);
            }
            PhraseKind::EndBlock => {
                if depth > 0 {
                    self.recovery.as_mut().expect("recovery state").depth = depth - 1;
                    self.skip_one(input);
                } else {
                    self.end_recovery(None);
                }
            }
            PhraseKind::Control => {
                let closes = input.peek().token.as_ref().map(|t| t.kind)
                    == Some(TokenKind::CloseBrace);
                if closes && depth == 0 {
                    self.end_recovery(None);
                } else {
                    self.skip_one(input);
                }
            }
            PhraseKind::StatementEnd | PhraseKind::SoftStatementEnd => {
                if depth > 0 {
                    self.skip_one(input);
                } else {
                    let phrase = input.take();
                    self.track_position(&phrase);
                    self.end_recovery(phrase.token);
                }
            }
            _ => self.skip_one(input),
        }
    }

    fn skip_one(&mut self, input: &mut Cell<PhraseToken>) {
        let phrase = input.take();
        self.track_position(&phrase);
        let errors = phrase.error.clone().into_iter().collect();
        self.push_event(TermKind::Ignorable, None, phrase.token, errors, phrase.range);
    }

    /// Close open scopes down to and including the interrupted statement
    /// and resume at the owning context's statement loop.
    fn end_recovery(&mut self, separator: Option<Token>) {
        self.recovery = None;
        let statement_index = self
            .scopes
            .iter()
            .rposition(|s| matches!(s, ScopeKind::Statement));
        let statement_index = match statement_index {
            Some(index) => index,
            None => {
                // no statement was open; resume the current context's loop
                // so the failing state is not re-entered
                let frame = self.frames.last_mut().expect("frame stack");
                frame.state = frame.grammar.states[frame.state].loop_state;
                return;
            }
        };

        let closing: Vec<ScopeKind> = self.scopes.drain(statement_index..).collect();
        let range = TextRange::at(self.last_position);
        for scope in closing.iter().rev() {
            match scope {
                ScopeKind::Object(name) => self.push_event(
                    TermKind::ObjectEnd,
                    Some(name.clone()),
                    None,
                    vec![],
                    range,
                ),
                ScopeKind::Property(name) => self.push_event(
                    TermKind::PropertyEnd,
                    Some(name.clone()),
                    None,
                    vec![],
                    range,
                ),
                ScopeKind::List(name) => self.push_event(
                    TermKind::ListPropertyEnd,
                    Some(name.clone()),
                    None,
                    vec![],
                    range,
                ),
                ScopeKind::Statement => self.push_event(
                    TermKind::StatementEnd,
                    None,
                    separator.clone(),
                    vec![],
                    range,
                ),
            }
        }

        while self.frames.len() > 1
            && self.frames.last().expect("frame stack").scope_base > statement_index
        {
            self.frames.pop();
        }
        let frame = self.frames.last_mut().expect("frame stack");
        frame.state = frame.grammar.states[frame.state].loop_state;
    }

    fn finish_stream(&mut self, range: TextRange) {
        if self.doc_open {
            self.close_doc_comment();
        }
        debug_assert!(
            self.scopes.is_empty(),
            "term scopes left open at end of stream: {:?}",
            self.scopes
        );
        // a truncated stream is closed rather than left unbalanced
        let leftovers: Vec<ScopeKind> = self.scopes.drain(..).collect();
        for scope in leftovers.iter().rev() {
            let error = ErrorInfo::new(
                codes::UNCLOSED_BLOCK,
                vec![],
                SourceLocation::new(&self.system_id, range.start),
            );
            match scope {
                ScopeKind::Object(name) => self.push_event(
                    TermKind::ObjectEnd,
                    Some(name.clone()),
                    None,
                    vec![error],
                    range,
                ),
                ScopeKind::Property(name) => self.push_event(
                    TermKind::PropertyEnd,
                    Some(name.clone()),
                    None,
                    vec![error],
                    range,
                ),
                ScopeKind::List(name) => self.push_event(
                    TermKind::ListPropertyEnd,
                    Some(name.clone()),
                    None,
                    vec![error],
                    range,
                ),
                ScopeKind::Statement => {
                    self.push_event(TermKind::StatementEnd, None, None, vec![error], range)
                }
            }
        }
        self.push_event(TermKind::Eof, None, None, vec![], range);
        self.finished = true;
    }

    fn push_event(
        &mut self,
        kind: TermKind,
        name: Option<String>,
        token: Option<Token>,
        errors: Vec<ErrorInfo>,
        range: TextRange,
    ) {
        self.queue.push_back(TermToken {
            kind,
            name,
            token,
            errors,
            range,
        });
    }
}

impl Default for TermParser {
    fn default() -> Self {
        TermParser::new()
    }
}

fn matcher_matches(matcher: &Matcher, phrase: &PhraseToken) -> bool {
    match matcher {
        Matcher::Text(text) => {
            phrase.kind == PhraseKind::SignificantToken
                && phrase.token.as_ref().map(|t| t.text.as_str()) == Some(text.as_str())
        }
        Matcher::Kind(kind) => {
            phrase.kind == PhraseKind::SignificantToken
                && phrase.token.as_ref().map(|t| t.kind) == Some(*kind)
        }
        Matcher::AnySignificant => phrase.kind == PhraseKind::SignificantToken,
        Matcher::BlockStart => phrase.kind == PhraseKind::StartBlock,
        Matcher::ControlOpen => {
            phrase.kind == PhraseKind::Control
                && phrase.token.as_ref().map(|t| t.kind) == Some(TokenKind::OpenBrace)
        }
        Matcher::ControlClose => {
            phrase.kind == PhraseKind::Control
                && phrase.token.as_ref().map(|t| t.kind) == Some(TokenKind::CloseBrace)
        }
        Matcher::BlockEndMark => phrase.kind == PhraseKind::EndBlock,
        Matcher::StatementBoundary => matches!(
            phrase.kind,
            PhraseKind::StatementEnd | PhraseKind::SoftStatementEnd
        ),
        Matcher::StreamEnd => phrase.kind == PhraseKind::Eof,
        Matcher::Else => true,
    }
}
