//! Compiled grammar representation.
//!
//! A compiled grammar is a flat, immutable state table: every state owns an
//! ordered list of transitions, each pairing a [`Matcher`] against the next
//! phrase token with the events to emit and where to go next. Production
//! calls go through an arena of [`CallSite`]s so that a site can be created
//! before its target exists; the [linker](linker) binds each site exactly
//! once. Nothing here is virtual: grammar compilation produces data, and
//! the term parser interprets it.

pub mod bootstrap;
pub mod builder;
pub mod compiler;
pub mod linker;

use crate::etl::errors::ErrorInfo;
use crate::etl::resource::ResourceDescriptor;
use crate::etl::tokens::TokenKind;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a grammar: qualified name plus version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GrammarId {
    pub name: String,
    pub version: String,
}

impl GrammarId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        GrammarId {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for GrammarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.name, self.version)
    }
}

/// A named production (or context) within a named grammar. Two contexts are
/// equal iff grammar identity and context name both match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DefinitionContext {
    pub grammar: GrammarId,
    pub context: String,
}

impl DefinitionContext {
    pub fn new(grammar: GrammarId, context: impl Into<String>) -> Self {
        DefinitionContext {
            grammar,
            context: context.into(),
        }
    }
}

impl fmt::Display for DefinitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.grammar, self.context)
    }
}

/// Predicate over the next phrase token.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Significant token with exactly this text.
    Text(String),
    /// Significant token of this lexical kind.
    Kind(TokenKind),
    /// Any significant token.
    AnySignificant,
    /// The synthetic marker before a `{`.
    BlockStart,
    /// The `{` itself, tagged `Control` by the phrase parser.
    ControlOpen,
    /// The `}` itself, tagged `Control` by the phrase parser.
    ControlClose,
    /// The synthetic marker after a `}`.
    BlockEndMark,
    /// An explicit or soft statement separator.
    StatementBoundary,
    /// End of the phrase stream.
    StreamEnd,
    /// Always matches, without looking at the token.
    Else,
}

/// Event to emit when a transition fires. Token-carrying events wrap the
/// token the transition consumed, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOp {
    StatementStart,
    StatementEnd,
    ObjectStart(String),
    ObjectEnd(String),
    PropertyStart(String),
    PropertyEnd(String),
    ListStart(String),
    ListEnd(String),
    Value,
    Structural,
    Modifier,
    Control,
    Ignorable,
}

/// Where a fired transition leaves the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// Continue at this state.
    State(usize),
    /// Call through the site arena; the current frame resumes at
    /// `return_to` once the callee returns.
    Call { site: usize, return_to: usize },
    /// Pop the current frame.
    Return,
}

/// One row of a state's transition table.
#[derive(Debug, Clone)]
pub struct Transition {
    pub matcher: Matcher,
    /// Whether the matched phrase token is consumed by this transition.
    pub consume: bool,
    pub emits: Vec<EmitOp>,
    pub next: Next,
}

/// One interpreter state.
#[derive(Debug, Clone)]
pub struct State {
    pub transitions: Vec<Transition>,
    /// The statement-loop state of the context this state belongs to;
    /// error recovery resumes there.
    pub loop_state: usize,
}

/// Resolution state of one call site.
#[derive(Debug, Clone)]
pub enum CallTarget {
    /// Not yet bound; carries the entry name it is waiting for.
    Pending(String),
    /// Entry state in the same grammar.
    Local(usize),
    /// Entry state in an imported, already compiled grammar.
    External(Arc<CompiledGrammar>, usize),
}

/// A pending or bound reference to another production's entry point.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub target: CallTarget,
}

impl CallSite {
    pub fn pending(name: impl Into<String>) -> Self {
        CallSite {
            target: CallTarget::Pending(name.into()),
        }
    }

    /// Bind this site to a local entry state.
    ///
    /// # Panics
    ///
    /// Panics if the site is already bound; sites are bound exactly once.
    pub fn bind_local(&mut self, state: usize) {
        match self.target {
            CallTarget::Pending(_) => self.target = CallTarget::Local(state),
            _ => panic!("call site is already bound"),
        }
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self.target, CallTarget::Pending(_))
    }
}

/// Immutable result of grammar compilation.
///
/// `errors` being non-empty means the grammar is unusable; a failed
/// compilation is still a value so the attempt can be cached and its
/// diagnostics inspected.
#[derive(Debug)]
pub struct CompiledGrammar {
    pub id: GrammarId,
    pub descriptor: ResourceDescriptor,
    pub default_context: String,
    entries: HashMap<String, usize>,
    pub states: Vec<State>,
    pub call_sites: Vec<CallSite>,
    pub errors: Vec<ErrorInfo>,
}

impl CompiledGrammar {
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }

    /// The definition context the term parser starts in by default.
    pub fn default_definition(&self) -> DefinitionContext {
        DefinitionContext::new(self.id.clone(), self.default_context.clone())
    }

    /// Entry state for a context or `Context.Production` name.
    pub fn entry(&self, name: &str) -> Option<usize> {
        self.entries.get(name).copied()
    }

    /// Entry state for a definition context, checking grammar identity.
    pub fn entry_for(&self, context: &DefinitionContext) -> Option<usize> {
        if context.grammar != self.id {
            return None;
        }
        self.entry(&context.context)
    }

    pub(crate) fn from_parts(
        id: GrammarId,
        descriptor: ResourceDescriptor,
        default_context: String,
        entries: HashMap<String, usize>,
        states: Vec<State>,
        call_sites: Vec<CallSite>,
        errors: Vec<ErrorInfo>,
    ) -> Self {
        CompiledGrammar {
            id,
            descriptor,
            default_context,
            entries,
            states,
            call_sites,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_context_equality() {
        let a = DefinitionContext::new(GrammarId::new("a.G", "1.0"), "Code");
        let b = DefinitionContext::new(GrammarId::new("a.G", "1.0"), "Code");
        let c = DefinitionContext::new(GrammarId::new("a.G", "2.0"), "Code");
        let d = DefinitionContext::new(GrammarId::new("a.G", "1.0"), "Other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_call_site_binds_once() {
        let mut site = CallSite::pending("Code.Expr");
        assert!(!site.is_bound());
        site.bind_local(3);
        assert!(site.is_bound());
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn test_call_site_rebind_panics() {
        let mut site = CallSite::pending("Code.Expr");
        site.bind_local(3);
        site.bind_local(4);
    }

    #[test]
    fn test_display_formats() {
        let ctx = DefinitionContext::new(GrammarId::new("ETL.Grammar", "0.3.0"), "Grammar");
        assert_eq!(format!("{}", ctx), "ETL.Grammar \"0.3.0\"::Grammar");
    }
}
