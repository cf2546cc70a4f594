//! Grammar compiler engine.
//!
//! The engine consumes the term-token stream of a grammar description
//! (produced by running the term parser with the bootstrap grammar grammar
//! over the description text) and produces a compiled grammar. It speaks
//! the same four-state protocol as the pipeline stages; `ResourceNeeded`
//! means one or more imported grammars must be fetched, and the caller
//! answers every outstanding request through [`GrammarCompiler::provide`]
//! or [`GrammarCompiler::fail`] before processing can continue.
//!
//! Failures accumulate instead of short-circuiting: an unreadable import
//! does not stop the compilation of independent parts, it only makes the
//! resulting grammar unusable and its error list non-empty. The attempt is
//! still a value, so callers can cache it and report every problem at
//! once.

use crate::etl::cell::Cell;
use crate::etl::errors::{codes, ErrorInfo, SourceLocation};
use crate::etl::grammar::builder::{
    ContextDef, Element, GrammarBuilder, ProductionDef, ProductionKind,
};
use crate::etl::grammar::{CompiledGrammar, GrammarId};
use crate::etl::position::Position;
use crate::etl::protocol::ParseResult;
use crate::etl::resource::{
    ResolvedObject, ResourceReference, ResourceRequest, ResourceUsage,
};
use crate::etl::term::{TermKind, TermToken};
use crate::etl::tokens::TokenKind;
use std::collections::HashMap;
use std::sync::Arc;

/// One significant token captured inside a property or object.
#[derive(Debug, Clone)]
struct ValueTok {
    text: String,
    kind: TokenKind,
}

/// An object subtree reassembled from start/end events.
#[derive(Debug, Default)]
struct Node {
    name: String,
    modifiers: Vec<String>,
    properties: Vec<(String, Vec<ValueTok>)>,
    children: Vec<Node>,
    position: Position,
}

impl Node {
    fn property(&self, name: &str) -> Option<&[ValueTok]> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    fn property_text(&self, name: &str) -> Option<String> {
        self.property(name)
            .map(|values| values.iter().map(|v| v.text.as_str()).collect())
    }
}

/// Reassembles object subtrees from the flat event stream.
#[derive(Debug, Default)]
struct Collector {
    stack: Vec<Node>,
    current_property: Option<(String, Vec<ValueTok>)>,
    roots: Vec<Node>,
    errors: Vec<ErrorInfo>,
}

impl Collector {
    fn consume(&mut self, event: &TermToken) {
        match event.kind {
            TermKind::ObjectStart => {
                self.stack.push(Node {
                    name: event.name.clone().unwrap_or_default(),
                    position: event.range.start,
                    ..Node::default()
                });
            }
            TermKind::ObjectEnd => {
                if let Some(node) = self.stack.pop() {
                    match self.stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => self.roots.push(node),
                    }
                }
            }
            TermKind::PropertyStart => {
                self.current_property =
                    Some((event.name.clone().unwrap_or_default(), Vec::new()));
            }
            TermKind::PropertyEnd => {
                if let Some(property) = self.current_property.take() {
                    if let Some(node) = self.stack.last_mut() {
                        node.properties.push(property);
                    }
                }
            }
            TermKind::Value | TermKind::Structural => {
                if let Some(token) = &event.token {
                    if let Some((_, values)) = self.current_property.as_mut() {
                        values.push(ValueTok {
                            text: token.text.clone(),
                            kind: token.kind,
                        });
                    }
                }
            }
            TermKind::Modifier => {
                if let Some(token) = &event.token {
                    if let Some(node) = self.stack.last_mut() {
                        node.modifiers.push(token.text.clone());
                    }
                }
            }
            TermKind::SyntaxError => {
                self.errors.extend(event.errors.iter().cloned());
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Resolving,
    Ready,
    Done,
}

/// Pull-driven compiler for one grammar description.
pub struct GrammarCompiler {
    request: Option<ResourceRequest>,
    system_id: String,
    collector: Collector,
    phase: Phase,
    outstanding: Vec<ResourceRequest>,
    provided: HashMap<String, Arc<CompiledGrammar>>,
    usages: Vec<ResourceUsage>,
    errors: Vec<ErrorInfo>,
    output: Option<ResolvedObject<Arc<CompiledGrammar>>>,
}

impl GrammarCompiler {
    pub fn new() -> Self {
        GrammarCompiler {
            request: None,
            system_id: String::new(),
            collector: Collector::default(),
            phase: Phase::Collecting,
            outstanding: Vec::new(),
            provided: HashMap::new(),
            usages: Vec::new(),
            errors: Vec::new(),
            output: None,
        }
    }

    /// Reset for one compilation, answering `request`.
    pub fn start(&mut self, request: ResourceRequest) {
        self.system_id = request.reference.identity().to_string();
        self.request = Some(request);
        self.collector = Collector::default();
        self.phase = Phase::Collecting;
        self.outstanding.clear();
        self.provided.clear();
        self.usages.clear();
        self.errors.clear();
        self.output = None;
    }

    /// Advance; term tokens are pulled from `input`.
    pub fn process(&mut self, input: &mut Cell<TermToken>, input_finished: bool) -> ParseResult {
        assert!(self.request.is_some(), "compiler not started");
        loop {
            match self.phase {
                Phase::Collecting => {
                    if input.has_element() {
                        let event = input.take();
                        if event.kind == TermKind::Eof {
                            self.finish_collecting();
                            continue;
                        }
                        self.collector.consume(&event);
                        continue;
                    }
                    if input_finished {
                        self.finish_collecting();
                        continue;
                    }
                    return ParseResult::InputNeeded;
                }
                Phase::Resolving => {
                    if !self.outstanding.is_empty() {
                        return ParseResult::ResourceNeeded;
                    }
                    self.compile();
                    continue;
                }
                Phase::Ready => return ParseResult::OutputAvailable,
                Phase::Done => return ParseResult::Eof,
            }
        }
    }

    /// The outstanding unresolved import requests.
    pub fn requests(&self) -> &[ResourceRequest] {
        &self.outstanding
    }

    /// Supply a successfully resolved import.
    pub fn provide(
        &mut self,
        resolved: ResolvedObject<Arc<CompiledGrammar>>,
        errors: Vec<ErrorInfo>,
    ) {
        self.take_outstanding(&resolved.request);
        let alias = resolved.request.requesting_context.clone();
        self.usages.push(ResourceUsage {
            reference: resolved.request.reference.clone(),
            descriptor: resolved.descriptor.clone(),
            role: "import".into(),
        });
        if !resolved.object.is_usable() {
            let mut error = ErrorInfo::new(
                codes::IMPORT_FAILED,
                vec![alias.clone(), resolved.request.reference.to_string()],
                SourceLocation::new(&self.system_id, Position::start()),
            );
            if let Some(first) = resolved.object.errors.first() {
                error = error.with_cause(first.clone());
            }
            self.errors.push(error);
        } else {
            self.provided.insert(alias, resolved.object);
        }
        ErrorInfo::merge(&mut self.errors, errors);
    }

    /// Report that an import could not be resolved. Compilation continues
    /// for independent imports; the result carries the accumulated errors.
    pub fn fail(
        &mut self,
        request: &ResourceRequest,
        usages: Vec<ResourceUsage>,
        error: ErrorInfo,
    ) {
        self.take_outstanding(request);
        self.usages.extend(usages);
        self.errors.push(
            ErrorInfo::new(
                codes::IMPORT_FAILED,
                vec![
                    request.requesting_context.clone(),
                    request.reference.to_string(),
                ],
                SourceLocation::new(&self.system_id, Position::start()),
            )
            .with_cause(error),
        );
    }

    /// Take the finished result.
    ///
    /// # Panics
    ///
    /// Panics when called before `process` reported `OutputAvailable`.
    pub fn read(&mut self) -> ResolvedObject<Arc<CompiledGrammar>> {
        match self.output.take() {
            Some(output) => {
                self.phase = Phase::Done;
                output
            }
            None => panic!("no compiled grammar pending; process() must report OutputAvailable"),
        }
    }

    fn take_outstanding(&mut self, request: &ResourceRequest) {
        let index = self
            .outstanding
            .iter()
            .position(|r| r == request)
            .unwrap_or_else(|| panic!("answer for a request that was never issued: {:?}", request));
        self.outstanding.remove(index);
    }

    fn location(&self, position: Position) -> SourceLocation {
        SourceLocation::new(&self.system_id, position)
    }

    fn finish_collecting(&mut self) {
        ErrorInfo::merge(&mut self.errors, self.collector.errors.drain(..));

        let grammars: Vec<&Node> = self
            .collector
            .roots
            .iter()
            .filter(|n| n.name == "GrammarStatement")
            .collect();
        match grammars.len() {
            0 => {
                self.errors.push(ErrorInfo::new(
                    codes::NO_GRAMMAR_DEFINITION,
                    vec![],
                    self.location(Position::start()),
                ));
            }
            1 => {}
            _ => {
                let position = grammars[1].position;
                self.errors.push(ErrorInfo::new(
                    codes::MULTIPLE_GRAMMAR_DEFINITIONS,
                    vec![grammars.len().to_string()],
                    self.location(position),
                ));
            }
        }

        // imports become outstanding requests before anything is compiled
        if let Some(grammar) = self
            .collector
            .roots
            .iter()
            .find(|n| n.name == "GrammarStatement")
        {
            for import in grammar.children.iter().filter(|n| n.name == "ImportStatement") {
                let alias = import.property_text("Alias").unwrap_or_default();
                let target = import.property_text("Target").unwrap_or_default();
                let version = import.property_text("TargetVersion").map(|v| unquote(&v));
                let system = import.property_text("From").map(|v| unquote(&v));
                let public = match &version {
                    Some(version) => format!("{} {}", target, version),
                    None => target.clone(),
                };
                self.outstanding.push(ResourceRequest::new(
                    ResourceReference::new(system, Some(public)),
                    alias,
                ));
            }
        }

        self.phase = Phase::Resolving;
    }

    fn compile(&mut self) {
        let request = self.request.clone().expect("compiler started");
        let roots = std::mem::take(&mut self.collector.roots);
        let grammar_node = roots.into_iter().find(|n| n.name == "GrammarStatement");

        let (id, contexts) = match &grammar_node {
            Some(node) => {
                let name = node.property_text("Name").unwrap_or_default();
                let version = node
                    .property_text("Version")
                    .map(|v| unquote(&v))
                    .unwrap_or_else(|| "1.0".to_string());
                let mut contexts = Vec::new();
                for child in &node.children {
                    if child.name == "ContextStatement" {
                        match self.map_context(child) {
                            Ok(context) => contexts.push(context),
                            Err(error) => self.errors.push(error),
                        }
                    }
                }
                (GrammarId::new(name, version), contexts)
            }
            None => (GrammarId::new("", "0.0"), Vec::new()),
        };

        let mut builder = GrammarBuilder::new(id, request.reference.identity());
        for (alias, grammar) in &self.provided {
            builder.add_import(alias.clone(), Arc::clone(grammar));
        }
        for context in contexts {
            builder.add_context(context);
        }
        for error in self.errors.drain(..) {
            builder.record_error(error);
        }
        let mut grammar = builder.build();
        grammar.descriptor.depends_on = self.usages.clone();

        let descriptor = grammar.descriptor.clone();
        let mut resolved = ResolvedObject::new(request, descriptor, Arc::new(grammar));
        resolved.usages = self.usages.clone();
        self.output = Some(resolved);
        self.phase = Phase::Ready;
    }

    fn map_context(&self, node: &Node) -> Result<ContextDef, ErrorInfo> {
        let name = node
            .property_text("Name")
            .ok_or_else(|| self.malformed(node, "context without a name"))?;
        let mut productions = Vec::new();
        for child in &node.children {
            let kind = match child.name.as_str() {
                "StatementDef" => ProductionKind::Statement,
                "ProductionDef" => ProductionKind::Helper,
                other => {
                    return Err(self.malformed(child, &format!("unexpected definition {}", other)))
                }
            };
            let production_name = child
                .property_text("Name")
                .ok_or_else(|| self.malformed(child, "definition without a name"))?;
            let mut elements = Vec::new();
            for element_node in &child.children {
                elements.push(self.map_element(element_node)?);
            }
            productions.push(ProductionDef {
                name: production_name,
                kind,
                elements,
            });
        }
        Ok(ContextDef {
            name,
            default: node.modifiers.iter().any(|m| m == "default"),
            productions,
        })
    }

    fn map_element(&self, node: &Node) -> Result<Element, ErrorInfo> {
        match node.name.as_str() {
            "TokenElement" => Ok(Element::Structural {
                text: self.quoted_property(node, "Text")?,
            }),
            "ModifierElement" => Ok(Element::Modifier {
                text: self.quoted_property(node, "Text")?,
            }),
            "KindElement" => {
                let kind_name = node
                    .property_text("Kind")
                    .ok_or_else(|| self.malformed(node, "kind element without a kind"))?;
                let kind = match kind_name.as_str() {
                    "identifier" => TokenKind::Identifier,
                    "number" => TokenKind::Number,
                    "string" => TokenKind::String,
                    "graphics" => TokenKind::Graphics,
                    other => {
                        return Err(
                            self.malformed(node, &format!("unknown token kind {}", other))
                        )
                    }
                };
                Ok(Element::Value { kind })
            }
            "PropertyElement" => Ok(Element::Property {
                name: self.named(node)?,
                body: self.body(node)?,
            }),
            "ListElement" => Ok(Element::ListProperty {
                name: self.named(node)?,
                body: self.body(node)?,
            }),
            "OptionalElement" => Ok(Element::Optional {
                body: self.body(node)?,
            }),
            "RefElement" => {
                let target = node
                    .property_text("Target")
                    .ok_or_else(|| self.malformed(node, "ref without a target"))?;
                match target.split_once('.') {
                    Some((alias, production)) if self.provided.contains_key(alias) => {
                        Ok(Element::ExternalRef {
                            alias: alias.to_string(),
                            production: production.to_string(),
                        })
                    }
                    _ => Ok(Element::Ref { production: target }),
                }
            }
            "BlockElement" => {
                let context = node
                    .property_text("Context")
                    .ok_or_else(|| self.malformed(node, "block without a context"))?;
                Ok(Element::Block { context })
            }
            other => Err(self.malformed(node, &format!("unexpected element {}", other))),
        }
    }

    fn named(&self, node: &Node) -> Result<String, ErrorInfo> {
        node.property_text("Name")
            .ok_or_else(|| self.malformed(node, "element without a name"))
    }

    fn quoted_property(&self, node: &Node, property: &str) -> Result<String, ErrorInfo> {
        let raw = node
            .property_text(property)
            .ok_or_else(|| self.malformed(node, &format!("missing {} literal", property)))?;
        Ok(unquote(&raw))
    }

    fn body(&self, node: &Node) -> Result<Vec<Element>, ErrorInfo> {
        node.children.iter().map(|c| self.map_element(c)).collect()
    }

    fn malformed(&self, node: &Node, reason: &str) -> ErrorInfo {
        ErrorInfo::new(
            codes::MALFORMED_GRAMMAR_SOURCE,
            vec![node.name.clone(), reason.to_string()],
            self.location(node.position),
        )
    }
}

impl Default for GrammarCompiler {
    fn default() -> Self {
        GrammarCompiler::new()
    }
}

/// Strip quotes and decode the escapes the lexer admits inside string
/// literals. Full literal decoding lives outside the core; this is just
/// enough for grammar-description keywords and ids.
pub(crate) fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(raw);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote_plain() {
        assert_eq!(unquote("\"let\""), "let");
        assert_eq!(unquote("'x'"), "x");
        assert_eq!(unquote("bare"), "bare");
    }

    #[test]
    fn test_unquote_escapes() {
        assert_eq!(unquote(r#""a\"b""#), "a\"b");
        assert_eq!(unquote(r#""a\nb""#), "a\nb");
        assert_eq!(unquote(r#""a\\b""#), "a\\b");
    }

    #[test]
    #[should_panic(expected = "never issued")]
    fn test_answer_without_request_panics() {
        let mut compiler = GrammarCompiler::new();
        compiler.start(ResourceRequest::new(
            ResourceReference::system("test:g"),
            "test",
        ));
        let request = ResourceRequest::new(ResourceReference::system("test:other"), "lib");
        compiler.fail(
            &request,
            vec![],
            ErrorInfo::new(
                codes::RESOURCE_UNREADABLE,
                vec![],
                SourceLocation::new("test", Position::start()),
            ),
        );
    }
}
