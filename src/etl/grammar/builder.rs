//! Flattening of grammar definitions into state tables.
//!
//! Both the hard-wired bootstrap grammars and the grammar compiler produce
//! their executable form through this builder: contexts and productions are
//! described as [`Element`] trees and flattened into the flat transition
//! tables the term parser interprets. Elements are compiled right to left
//! so every element knows its continuation; branching constructs (optional,
//! repetition, alternation) decide by the first token of their body, which
//! therefore must be concrete: a production reference cannot open an
//! optional branch.
//!
//! Every context gets three framing states: a statement loop, a statement
//! dispatch and a statement close. The loop passes stray separators
//! through, returns on block closure, and opens a statement for anything
//! else; the dispatch selects a statement production by lookahead; the
//! close consumes the statement boundary. Error recovery always resumes at
//! the owning context's loop state.

use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::grammar::linker::ActionLinker;
use crate::etl::grammar::{
    CallSite, CallTarget, CompiledGrammar, EmitOp, GrammarId, Matcher, Next, State, Transition,
};
use crate::etl::position::Position;
use crate::etl::resource::{ResourceDescriptor, GRAMMAR_NATURE};
use crate::etl::tokens::TokenKind;
use std::collections::HashMap;
use std::sync::Arc;

/// One syntactic element of a production body.
#[derive(Debug, Clone)]
pub enum Element {
    /// A keyword or punctuation token, emitted as a structural event.
    Structural { text: String },
    /// A fixed token emitted as a value (keyword-like values).
    ValueText { text: String },
    /// Any token of the given lexical kind, emitted as a value.
    Value { kind: TokenKind },
    /// A fixed token emitted as a modifier.
    Modifier { text: String },
    /// Any significant token, emitted as a value.
    AnyToken,
    /// Wrap the body in object start/end events.
    Object { name: String, body: Vec<Element> },
    /// Wrap the body in property start/end events.
    Property { name: String, body: Vec<Element> },
    /// Zero or more repetitions of the body, wrapped in list events.
    ListProperty { name: String, body: Vec<Element> },
    /// Body or nothing.
    Optional { body: Vec<Element> },
    /// Zero or more repetitions, no wrapping events.
    Repeat { body: Vec<Element> },
    /// Exactly one of the alternatives.
    OneOf { alternatives: Vec<Vec<Element>> },
    /// Call a production: `Name` in the current context or `Ctx.Name`.
    Ref { production: String },
    /// Call a production in an imported grammar's default context.
    ExternalRef { alias: String, production: String },
    /// A `{ ... }` block parsed in the named context (`Ctx` local,
    /// `alias.Ctx` imported).
    Block { context: String },
}

/// Whether a production participates in statement dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionKind {
    /// Dispatched at statement level and wrapped in an object carrying the
    /// production name.
    Statement,
    /// Only callable through `Ref`; no implicit wrapping.
    Helper,
}

#[derive(Debug, Clone)]
pub struct ProductionDef {
    pub name: String,
    pub kind: ProductionKind,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone)]
pub struct ContextDef {
    pub name: String,
    pub default: bool,
    pub productions: Vec<ProductionDef>,
}

/// Builds one [`CompiledGrammar`] from context definitions.
pub struct GrammarBuilder {
    id: GrammarId,
    descriptor: ResourceDescriptor,
    imports: HashMap<String, Arc<CompiledGrammar>>,
    contexts: Vec<ContextDef>,
    errors: Vec<ErrorInfo>,
    // build state
    states: Vec<State>,
    sites: Vec<CallSite>,
    entries: HashMap<String, usize>,
    linker: ActionLinker,
    current_loop: usize,
}

impl GrammarBuilder {
    pub fn new(id: GrammarId, identity: impl Into<String>) -> Self {
        let descriptor =
            ResourceDescriptor::new(identity, GRAMMAR_NATURE, id.version.clone());
        GrammarBuilder {
            id,
            descriptor,
            imports: HashMap::new(),
            contexts: Vec::new(),
            errors: Vec::new(),
            states: Vec::new(),
            sites: Vec::new(),
            entries: HashMap::new(),
            linker: ActionLinker::new(),
            current_loop: 0,
        }
    }

    /// Make an already compiled grammar callable under `alias`.
    pub fn add_import(&mut self, alias: impl Into<String>, grammar: Arc<CompiledGrammar>) {
        self.imports.insert(alias.into(), grammar);
    }

    pub fn add_context(&mut self, context: ContextDef) {
        self.contexts.push(context);
    }

    /// Record a fatal error discovered before or during building.
    pub fn record_error(&mut self, error: ErrorInfo) {
        self.errors.push(error);
    }

    fn error(&mut self, id: &str, params: Vec<String>) {
        let location = SourceLocation::new(&self.descriptor.identity, Position::start());
        self.errors.push(ErrorInfo::new(id, params, location));
    }

    fn alloc(&mut self, transitions: Vec<Transition>) -> usize {
        let index = self.states.len();
        self.states.push(State {
            transitions,
            loop_state: self.current_loop,
        });
        index
    }

    /// Flatten everything into a compiled grammar. Unresolved references
    /// and lookahead violations end up in the error list; the grammar is
    /// still returned so the attempt can be cached and inspected.
    pub fn build(mut self) -> CompiledGrammar {
        let contexts = std::mem::take(&mut self.contexts);

        // framing states first, so forward context references have a target
        let mut framing = Vec::with_capacity(contexts.len());
        for context in &contexts {
            let loop_state = self.states.len();
            self.current_loop = loop_state;
            let l = self.alloc(Vec::new());
            let d = self.alloc(Vec::new());
            let e = self.alloc(Vec::new());
            self.entries.insert(context.name.clone(), l);
            framing.push((l, d, e));
        }

        let mut default_context = None;
        for (context, &(l, d, e)) in contexts.iter().zip(&framing) {
            self.current_loop = l;
            if context.default {
                if default_context.is_some() {
                    self.error(
                        codes::MULTIPLE_GRAMMAR_DEFINITIONS,
                        vec![format!("more than one default context: {}", context.name)],
                    );
                }
                default_context = Some(context.name.clone());
            }

            for production in &context.productions {
                let elements = match production.kind {
                    ProductionKind::Statement => vec![Element::Object {
                        name: production.name.clone(),
                        body: production.elements.clone(),
                    }],
                    ProductionKind::Helper => production.elements.clone(),
                };
                let entry_next = self.compile_seq(&context.name, &elements, Next::Return);
                let entry = self.materialize(entry_next);
                let full_name = format!("{}.{}", context.name, production.name);
                self.entries.insert(full_name.clone(), entry);
                self.linker.resolve_block(&mut self.sites, &full_name, entry);
            }

            // statement dispatch, in declaration order
            let mut dispatch = Vec::new();
            for production in &context.productions {
                if production.kind != ProductionKind::Statement {
                    continue;
                }
                let full_name = format!("{}.{}", context.name, production.name);
                match self.first_matchers(&context.name, &production.elements) {
                    Ok(matchers) => {
                        let site = self.sites.len();
                        self.sites.push(CallSite::pending(&full_name));
                        self.linker.link_block(&mut self.sites, site, &full_name);
                        for matcher in matchers {
                            dispatch.push(Transition {
                                matcher,
                                consume: false,
                                emits: vec![],
                                next: Next::Call {
                                    site,
                                    return_to: e,
                                },
                            });
                        }
                    }
                    Err(reason) => self.error(
                        codes::MALFORMED_GRAMMAR_SOURCE,
                        vec![full_name, reason],
                    ),
                }
            }
            self.states[d].transitions = dispatch;

            self.states[l].transitions = vec![
                Transition {
                    matcher: Matcher::StatementBoundary,
                    consume: true,
                    emits: vec![EmitOp::Ignorable],
                    next: Next::State(l),
                },
                Transition {
                    matcher: Matcher::ControlClose,
                    consume: false,
                    emits: vec![],
                    next: Next::Return,
                },
                Transition {
                    matcher: Matcher::BlockEndMark,
                    consume: false,
                    emits: vec![],
                    next: Next::Return,
                },
                Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::StatementStart],
                    next: Next::State(d),
                },
            ];

            self.states[e].transitions = vec![Transition {
                matcher: Matcher::StatementBoundary,
                consume: true,
                emits: vec![EmitOp::StatementEnd],
                next: Next::State(l),
            }];
        }

        for name in self.linker.unresolved() {
            self.error(codes::UNRESOLVED_PRODUCTION, vec![name]);
        }

        let default_context = match default_context.or_else(|| contexts.first().map(|c| c.name.clone())) {
            Some(name) => name,
            None => {
                self.error(codes::NO_GRAMMAR_DEFINITION, vec!["no contexts".into()]);
                String::new()
            }
        };

        CompiledGrammar::from_parts(
            self.id,
            self.descriptor,
            default_context,
            self.entries,
            self.states,
            self.sites,
            self.errors,
        )
    }

    fn compile_seq(&mut self, ctx: &str, elements: &[Element], follow: Next) -> Next {
        let mut next = follow;
        for element in elements.iter().rev() {
            next = self.compile_element(ctx, element, next);
        }
        next
    }

    fn compile_element(&mut self, ctx: &str, element: &Element, next: Next) -> Next {
        match element {
            Element::Structural { text } => Next::State(self.alloc(vec![Transition {
                matcher: Matcher::Text(text.clone()),
                consume: true,
                emits: vec![EmitOp::Structural],
                next,
            }])),
            Element::ValueText { text } => Next::State(self.alloc(vec![Transition {
                matcher: Matcher::Text(text.clone()),
                consume: true,
                emits: vec![EmitOp::Value],
                next,
            }])),
            Element::Value { kind } => Next::State(self.alloc(vec![Transition {
                matcher: Matcher::Kind(*kind),
                consume: true,
                emits: vec![EmitOp::Value],
                next,
            }])),
            Element::Modifier { text } => Next::State(self.alloc(vec![Transition {
                matcher: Matcher::Text(text.clone()),
                consume: true,
                emits: vec![EmitOp::Modifier],
                next,
            }])),
            Element::AnyToken => Next::State(self.alloc(vec![Transition {
                matcher: Matcher::AnySignificant,
                consume: true,
                emits: vec![EmitOp::Value],
                next,
            }])),
            Element::Object { name, body } => {
                let end = self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::ObjectEnd(name.clone())],
                    next,
                }]);
                let body_entry = self.compile_seq(ctx, body, Next::State(end));
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::ObjectStart(name.clone())],
                    next: body_entry,
                }]))
            }
            Element::Property { name, body } => {
                let end = self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::PropertyEnd(name.clone())],
                    next,
                }]);
                let body_entry = self.compile_seq(ctx, body, Next::State(end));
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::PropertyStart(name.clone())],
                    next: body_entry,
                }]))
            }
            Element::ListProperty { name, body } => {
                let end = self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::ListEnd(name.clone())],
                    next,
                }]);
                let loop_state = self.alloc(Vec::new());
                let body_entry = self.compile_seq(ctx, body, Next::State(loop_state));
                let mut transitions = Vec::new();
                match self.first_matchers(ctx, body) {
                    Ok(matchers) => {
                        for matcher in matchers {
                            transitions.push(Transition {
                                matcher,
                                consume: false,
                                emits: vec![],
                                next: body_entry.clone(),
                            });
                        }
                    }
                    Err(reason) => self.error(
                        codes::MALFORMED_GRAMMAR_SOURCE,
                        vec![format!("list {}", name), reason],
                    ),
                }
                transitions.push(Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next: Next::State(end),
                });
                self.states[loop_state].transitions = transitions;
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![EmitOp::ListStart(name.clone())],
                    next: Next::State(loop_state),
                }]))
            }
            Element::Repeat { body } => {
                let loop_state = self.alloc(Vec::new());
                let body_entry = self.compile_seq(ctx, body, Next::State(loop_state));
                let mut transitions = Vec::new();
                match self.first_matchers(ctx, body) {
                    Ok(matchers) => {
                        for matcher in matchers {
                            transitions.push(Transition {
                                matcher,
                                consume: false,
                                emits: vec![],
                                next: body_entry.clone(),
                            });
                        }
                    }
                    Err(reason) => {
                        self.error(codes::MALFORMED_GRAMMAR_SOURCE, vec!["repeat".into(), reason])
                    }
                }
                transitions.push(Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next,
                });
                self.states[loop_state].transitions = transitions;
                Next::State(loop_state)
            }
            Element::Optional { body } => {
                let body_entry = self.compile_seq(ctx, body, next.clone());
                let mut transitions = Vec::new();
                match self.first_matchers(ctx, body) {
                    Ok(matchers) => {
                        for matcher in matchers {
                            transitions.push(Transition {
                                matcher,
                                consume: false,
                                emits: vec![],
                                next: body_entry.clone(),
                            });
                        }
                    }
                    Err(reason) => {
                        self.error(codes::MALFORMED_GRAMMAR_SOURCE, vec!["optional".into(), reason])
                    }
                }
                transitions.push(Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next,
                });
                Next::State(self.alloc(transitions))
            }
            Element::OneOf { alternatives } => {
                let mut transitions = Vec::new();
                for alternative in alternatives {
                    let entry = self.compile_seq(ctx, alternative, next.clone());
                    match self.first_matchers(ctx, alternative) {
                        Ok(matchers) => {
                            for matcher in matchers {
                                transitions.push(Transition {
                                    matcher,
                                    consume: false,
                                    emits: vec![],
                                    next: entry.clone(),
                                });
                            }
                        }
                        Err(reason) => self.error(
                            codes::MALFORMED_GRAMMAR_SOURCE,
                            vec!["alternative".into(), reason],
                        ),
                    }
                }
                Next::State(self.alloc(transitions))
            }
            Element::Ref { production } => {
                let target = if production.contains('.') {
                    production.clone()
                } else {
                    format!("{}.{}", ctx, production)
                };
                let site = self.sites.len();
                self.sites.push(CallSite::pending(&target));
                self.linker.link_block(&mut self.sites, site, &target);
                let return_to = self.materialize(next);
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next: Next::Call { site, return_to },
                }]))
            }
            Element::ExternalRef { alias, production } => {
                let site = self.external_site(alias, production, false);
                let return_to = self.materialize(next);
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next: Next::Call { site, return_to },
                }]))
            }
            Element::Block { context } => {
                let site = self.block_site(ctx, context);
                let after_end = self.materialize(next);
                let s5 = self.alloc(vec![Transition {
                    matcher: Matcher::BlockEndMark,
                    consume: true,
                    emits: vec![],
                    next: Next::State(after_end),
                }]);
                let s4 = self.alloc(vec![Transition {
                    matcher: Matcher::ControlClose,
                    consume: true,
                    emits: vec![EmitOp::Control],
                    next: Next::State(s5),
                }]);
                let s3 = self.alloc(vec![Transition {
                    matcher: Matcher::Else,
                    consume: false,
                    emits: vec![],
                    next: Next::Call {
                        site,
                        return_to: s4,
                    },
                }]);
                let s2 = self.alloc(vec![Transition {
                    matcher: Matcher::ControlOpen,
                    consume: true,
                    emits: vec![EmitOp::Control],
                    next: Next::State(s3),
                }]);
                Next::State(self.alloc(vec![Transition {
                    matcher: Matcher::BlockStart,
                    consume: true,
                    emits: vec![],
                    next: Next::State(s2),
                }]))
            }
        }
    }

    /// Call site for a production in an imported grammar's default context.
    fn external_site(&mut self, alias: &str, production: &str, context_entry: bool) -> usize {
        let site = self.sites.len();
        let imported = self.imports.get(alias).cloned();
        let target = match imported {
            Some(grammar) => {
                let name = if context_entry {
                    production.to_string()
                } else {
                    format!("{}.{}", grammar.default_context, production)
                };
                match grammar.entry(&name) {
                    Some(state) => CallTarget::External(grammar, state),
                    None => {
                        self.error(
                            codes::UNRESOLVED_PRODUCTION,
                            vec![format!("{}.{}", alias, production)],
                        );
                        CallTarget::Pending(format!("{}.{}", alias, production))
                    }
                }
            }
            None => {
                self.error(codes::IMPORT_FAILED, vec![alias.to_string()]);
                CallTarget::Pending(format!("{}.{}", alias, production))
            }
        };
        self.sites.push(CallSite { target });
        site
    }

    /// Call site for a block's context loop, local or imported.
    fn block_site(&mut self, _ctx: &str, context: &str) -> usize {
        if let Some((alias, ctx_name)) = context.split_once('.') {
            if self.imports.contains_key(alias) {
                return self.external_site(alias, ctx_name, true);
            }
        }
        match self.entries.get(context).copied() {
            Some(state) => {
                let site = self.sites.len();
                self.sites.push(CallSite {
                    target: CallTarget::Local(state),
                });
                site
            }
            None => {
                self.error(codes::UNKNOWN_CONTEXT, vec![context.to_string()]);
                let site = self.sites.len();
                self.sites.push(CallSite::pending(context));
                site
            }
        }
    }

    fn materialize(&mut self, next: Next) -> usize {
        match next {
            Next::State(index) => index,
            other => self.alloc(vec![Transition {
                matcher: Matcher::Else,
                consume: false,
                emits: vec![],
                next: other,
            }]),
        }
    }

    fn first_matchers(&mut self, ctx: &str, elements: &[Element]) -> Result<Vec<Matcher>, String> {
        let first = match elements.first() {
            Some(first) => first,
            None => return Err("empty element sequence".into()),
        };
        match first {
            Element::Structural { text }
            | Element::ValueText { text }
            | Element::Modifier { text } => Ok(vec![Matcher::Text(text.clone())]),
            Element::Value { kind } => Ok(vec![Matcher::Kind(*kind)]),
            Element::AnyToken => Ok(vec![Matcher::AnySignificant]),
            Element::Object { body, .. } | Element::Property { body, .. } => {
                self.first_matchers(ctx, body)
            }
            Element::OneOf { alternatives } => {
                let mut all = Vec::new();
                for alternative in alternatives {
                    all.extend(self.first_matchers(ctx, alternative)?);
                }
                Ok(all)
            }
            Element::Block { .. } => Ok(vec![Matcher::BlockStart]),
            Element::ListProperty { .. } | Element::Optional { .. } | Element::Repeat { .. } => {
                Err("element may match empty input and cannot open a branch".into())
            }
            Element::Ref { .. } | Element::ExternalRef { .. } => {
                Err("branch must start with a concrete token, not a reference".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> GrammarBuilder {
        GrammarBuilder::new(GrammarId::new("test.G", "1.0"), "test:g")
    }

    #[test]
    fn test_build_simple_statement_grammar() {
        let mut b = builder();
        b.add_context(ContextDef {
            name: "Code".into(),
            default: true,
            productions: vec![ProductionDef {
                name: "Let".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "let".into(),
                    },
                    Element::Value {
                        kind: TokenKind::Identifier,
                    },
                ],
            }],
        });
        let grammar = b.build();
        assert!(grammar.is_usable(), "errors: {:?}", grammar.errors);
        assert_eq!(grammar.default_context, "Code");
        assert!(grammar.entry("Code").is_some());
        assert!(grammar.entry("Code.Let").is_some());
        assert!(grammar.call_sites.iter().all(|s| s.is_bound()));
    }

    #[test]
    fn test_mutual_recursion_links_all_sites() {
        let mut b = builder();
        b.add_context(ContextDef {
            name: "Code".into(),
            default: true,
            productions: vec![
                ProductionDef {
                    name: "A".into(),
                    kind: ProductionKind::Helper,
                    elements: vec![
                        Element::Structural { text: "a".into() },
                        Element::Optional {
                            body: vec![
                                Element::Structural { text: "b".into() },
                                Element::Ref {
                                    production: "B".into(),
                                },
                            ],
                        },
                    ],
                },
                ProductionDef {
                    name: "B".into(),
                    kind: ProductionKind::Helper,
                    elements: vec![
                        Element::Structural { text: "b".into() },
                        Element::Optional {
                            body: vec![
                                Element::Structural { text: "a".into() },
                                Element::Ref {
                                    production: "A".into(),
                                },
                            ],
                        },
                    ],
                },
            ],
        });
        let grammar = b.build();
        assert!(grammar.is_usable(), "errors: {:?}", grammar.errors);
        assert!(grammar.call_sites.iter().all(|s| s.is_bound()));
    }

    #[test]
    fn test_unresolved_reference_is_an_error() {
        let mut b = builder();
        b.add_context(ContextDef {
            name: "Code".into(),
            default: true,
            productions: vec![ProductionDef {
                name: "A".into(),
                kind: ProductionKind::Helper,
                elements: vec![
                    Element::Structural { text: "a".into() },
                    Element::Ref {
                        production: "Ghost".into(),
                    },
                ],
            }],
        });
        let grammar = b.build();
        assert!(!grammar.is_usable());
        assert!(grammar
            .errors
            .iter()
            .any(|e| e.error_id == codes::UNRESOLVED_PRODUCTION));
    }

    #[test]
    fn test_ref_heading_a_branch_is_rejected() {
        let mut b = builder();
        b.add_context(ContextDef {
            name: "Code".into(),
            default: true,
            productions: vec![
                ProductionDef {
                    name: "X".into(),
                    kind: ProductionKind::Helper,
                    elements: vec![Element::Structural { text: "x".into() }],
                },
                ProductionDef {
                    name: "A".into(),
                    kind: ProductionKind::Helper,
                    elements: vec![
                        Element::Structural { text: "a".into() },
                        Element::Optional {
                            body: vec![Element::Ref {
                                production: "X".into(),
                            }],
                        },
                    ],
                },
            ],
        });
        let grammar = b.build();
        assert!(!grammar.is_usable());
        assert!(grammar
            .errors
            .iter()
            .any(|e| e.error_id == codes::MALFORMED_GRAMMAR_SOURCE));
    }

    #[test]
    fn test_empty_grammar_reports_missing_definition() {
        let grammar = builder().build();
        assert!(!grammar.is_usable());
        assert!(grammar
            .errors
            .iter()
            .any(|e| e.error_id == codes::NO_GRAMMAR_DEFINITION));
    }
}
