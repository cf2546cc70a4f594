//! The hard-wired seed grammars.
//!
//! Parsing a grammar description requires a compiled grammar for the
//! grammar description language, which would itself have to be compiled
//! from a description. The circle is broken here: a small fixed set of
//! grammars is built directly through the [builder](super::builder),
//! without any parsing.
//!
//! The set contains the doctype grammar (the `doctype ...;` prologue of
//! every document), the default dialect (used when a document declares no
//! doctype: statements of arbitrary tokens, nested blocks parsed
//! recursively) and the grammar grammar (the description language the
//! [compiler](super::compiler) consumes). The grammar grammar's public id
//! is reserved: the resolver intercepts it before any cache lookup.

use crate::etl::grammar::builder::{
    ContextDef, Element, GrammarBuilder, ProductionDef, ProductionKind,
};
use crate::etl::grammar::{CompiledGrammar, GrammarId};
use crate::etl::tokens::TokenKind;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Reserved public id of the grammar description grammar.
pub const GRAMMAR_GRAMMAR_PUBLIC_ID: &str = "ETL.Grammar 0.3.0";
/// Public id of the doctype prologue grammar.
pub const DOCTYPE_PUBLIC_ID: &str = "ETL.Doctype 0.3.0";
/// Public id of the default document dialect.
pub const DEFAULT_DIALECT_PUBLIC_ID: &str = "ETL.Default 0.3.0";

static SHARED: Lazy<Arc<BootstrapSet>> = Lazy::new(|| Arc::new(BootstrapSet::new()));

/// The three pre-compiled grammars, built once per set.
pub struct BootstrapSet {
    doctype: Arc<CompiledGrammar>,
    default_dialect: Arc<CompiledGrammar>,
    grammar_grammar: Arc<CompiledGrammar>,
}

impl BootstrapSet {
    /// Build the set from scratch.
    ///
    /// # Panics
    ///
    /// Panics if a seed grammar fails to build; that is a defect in the
    /// seed definitions, not a data error.
    pub fn new() -> Self {
        BootstrapSet {
            doctype: Arc::new(seed("doctype grammar", build_doctype())),
            default_dialect: Arc::new(seed("default dialect", build_default_dialect())),
            grammar_grammar: Arc::new(seed("grammar grammar", build_grammar_grammar())),
        }
    }

    /// The process-wide shared instance; the set is immutable, so sharing
    /// is only an allocation saving.
    pub fn shared() -> Arc<BootstrapSet> {
        Arc::clone(&SHARED)
    }

    pub fn doctype(&self) -> Arc<CompiledGrammar> {
        Arc::clone(&self.doctype)
    }

    pub fn default_dialect(&self) -> Arc<CompiledGrammar> {
        Arc::clone(&self.default_dialect)
    }

    pub fn grammar_grammar(&self) -> Arc<CompiledGrammar> {
        Arc::clone(&self.grammar_grammar)
    }

    /// Grammar for a reserved public id, if it names one.
    pub fn lookup_public(&self, public_id: &str) -> Option<Arc<CompiledGrammar>> {
        match public_id {
            GRAMMAR_GRAMMAR_PUBLIC_ID => Some(self.grammar_grammar()),
            DOCTYPE_PUBLIC_ID => Some(self.doctype()),
            DEFAULT_DIALECT_PUBLIC_ID => Some(self.default_dialect()),
            _ => None,
        }
    }
}

impl Default for BootstrapSet {
    fn default() -> Self {
        BootstrapSet::new()
    }
}

fn seed(what: &str, grammar: CompiledGrammar) -> CompiledGrammar {
    if !grammar.is_usable() {
        panic!("seed {} failed to build: {:?}", what, grammar.errors);
    }
    grammar
}

/// `Name` / `Name.Sub.Part` qualified names, shared by several seeds.
fn qname_production() -> ProductionDef {
    ProductionDef {
        name: "QName".into(),
        kind: ProductionKind::Helper,
        elements: vec![
            Element::Value {
                kind: TokenKind::Identifier,
            },
            Element::Repeat {
                body: vec![
                    Element::Structural { text: ".".into() },
                    Element::Value {
                        kind: TokenKind::Identifier,
                    },
                ],
            },
        ],
    }
}

/// `doctype [strict|lax] Qualified.Name ["version"] [system "id"]
/// [context = Name];`
fn build_doctype() -> CompiledGrammar {
    let mut b = GrammarBuilder::new(GrammarId::new("ETL.Doctype", "0.3.0"), DOCTYPE_PUBLIC_ID);
    b.add_context(ContextDef {
        name: "Doctype".into(),
        default: true,
        productions: vec![
            qname_production(),
            ProductionDef {
                name: "DoctypeStatement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "doctype".into(),
                    },
                    Element::Optional {
                        body: vec![Element::ValueText {
                            text: "strict".into(),
                        }],
                    },
                    Element::Optional {
                        body: vec![Element::ValueText { text: "lax".into() }],
                    },
                    Element::Ref {
                        production: "QName".into(),
                    },
                    Element::Optional {
                        body: vec![Element::Value {
                            kind: TokenKind::String,
                        }],
                    },
                    Element::Optional {
                        body: vec![
                            Element::Structural {
                                text: "system".into(),
                            },
                            Element::Value {
                                kind: TokenKind::String,
                            },
                        ],
                    },
                    Element::Optional {
                        body: vec![
                            Element::Structural {
                                text: "context".into(),
                            },
                            Element::Structural { text: "=".into() },
                            Element::Value {
                                kind: TokenKind::Identifier,
                            },
                        ],
                    },
                ],
            },
        ],
    });
    b.build()
}

/// Statements of arbitrary significant tokens; `{}` blocks recurse into
/// the same context as nested statements.
fn build_default_dialect() -> CompiledGrammar {
    let item = Element::OneOf {
        alternatives: vec![
            vec![Element::AnyToken],
            vec![Element::Block {
                context: "Default".into(),
            }],
        ],
    };
    let mut b = GrammarBuilder::new(
        GrammarId::new("ETL.Default", "0.3.0"),
        DEFAULT_DIALECT_PUBLIC_ID,
    );
    b.add_context(ContextDef {
        name: "Default".into(),
        default: true,
        productions: vec![ProductionDef {
            name: "Statement".into(),
            kind: ProductionKind::Statement,
            elements: vec![
                item.clone(),
                Element::Repeat {
                    body: vec![item],
                },
            ],
        }],
    });
    b.build()
}

/// The grammar description language itself.
fn build_grammar_grammar() -> CompiledGrammar {
    let mut b = GrammarBuilder::new(
        GrammarId::new("ETL.Grammar", "0.3.0"),
        GRAMMAR_GRAMMAR_PUBLIC_ID,
    );

    b.add_context(ContextDef {
        name: "Grammar".into(),
        default: true,
        productions: vec![
            qname_production(),
            ProductionDef {
                name: "GrammarStatement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "grammar".into(),
                    },
                    Element::Property {
                        name: "Name".into(),
                        body: vec![Element::Ref {
                            production: "QName".into(),
                        }],
                    },
                    Element::Optional {
                        body: vec![Element::Property {
                            name: "Version".into(),
                            body: vec![Element::Value {
                                kind: TokenKind::String,
                            }],
                        }],
                    },
                    Element::Block {
                        context: "Body".into(),
                    },
                ],
            },
        ],
    });

    b.add_context(ContextDef {
        name: "Body".into(),
        default: false,
        productions: vec![
            ProductionDef {
                name: "ImportStatement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "import".into(),
                    },
                    Element::Property {
                        name: "Alias".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::Identifier,
                        }],
                    },
                    Element::Structural { text: "=".into() },
                    Element::Property {
                        name: "Target".into(),
                        body: vec![Element::Ref {
                            production: "Grammar.QName".into(),
                        }],
                    },
                    Element::Optional {
                        body: vec![Element::Property {
                            name: "TargetVersion".into(),
                            body: vec![Element::Value {
                                kind: TokenKind::String,
                            }],
                        }],
                    },
                    Element::Optional {
                        body: vec![
                            Element::Structural {
                                text: "from".into(),
                            },
                            Element::Property {
                                name: "From".into(),
                                body: vec![Element::Value {
                                    kind: TokenKind::String,
                                }],
                            },
                        ],
                    },
                ],
            },
            ProductionDef {
                name: "ContextStatement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "context".into(),
                    },
                    Element::Optional {
                        body: vec![Element::Modifier {
                            text: "default".into(),
                        }],
                    },
                    Element::Property {
                        name: "Name".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::Identifier,
                        }],
                    },
                    Element::Block {
                        context: "ContextBody".into(),
                    },
                ],
            },
        ],
    });

    b.add_context(ContextDef {
        name: "ContextBody".into(),
        default: false,
        productions: vec![
            definition_statement("StatementDef", "statement"),
            definition_statement("ProductionDef", "production"),
        ],
    });

    b.add_context(ContextDef {
        name: "Elements".into(),
        default: false,
        productions: vec![
            ProductionDef {
                name: "TokenElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "token".into(),
                    },
                    Element::Property {
                        name: "Text".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::String,
                        }],
                    },
                ],
            },
            ProductionDef {
                name: "KindElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "kind".into(),
                    },
                    Element::Property {
                        name: "Kind".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::Identifier,
                        }],
                    },
                ],
            },
            ProductionDef {
                name: "ModifierElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "modifier".into(),
                    },
                    Element::Property {
                        name: "Text".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::String,
                        }],
                    },
                ],
            },
            ProductionDef {
                name: "PropertyElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "property".into(),
                    },
                    Element::Property {
                        name: "Name".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::Identifier,
                        }],
                    },
                    Element::Block {
                        context: "Elements".into(),
                    },
                ],
            },
            ProductionDef {
                name: "ListElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "list".into(),
                    },
                    Element::Property {
                        name: "Name".into(),
                        body: vec![Element::Value {
                            kind: TokenKind::Identifier,
                        }],
                    },
                    Element::Block {
                        context: "Elements".into(),
                    },
                ],
            },
            ProductionDef {
                name: "OptionalElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "optional".into(),
                    },
                    Element::Block {
                        context: "Elements".into(),
                    },
                ],
            },
            ProductionDef {
                name: "RefElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural { text: "ref".into() },
                    Element::Property {
                        name: "Target".into(),
                        body: vec![Element::Ref {
                            production: "Grammar.QName".into(),
                        }],
                    },
                ],
            },
            ProductionDef {
                name: "BlockElement".into(),
                kind: ProductionKind::Statement,
                elements: vec![
                    Element::Structural {
                        text: "block".into(),
                    },
                    Element::Property {
                        name: "Context".into(),
                        body: vec![Element::Ref {
                            production: "Grammar.QName".into(),
                        }],
                    },
                ],
            },
        ],
    });

    b.build()
}

fn definition_statement(name: &str, keyword: &str) -> ProductionDef {
    ProductionDef {
        name: name.into(),
        kind: ProductionKind::Statement,
        elements: vec![
            Element::Structural {
                text: keyword.into(),
            },
            Element::Property {
                name: "Name".into(),
                body: vec![Element::Value {
                    kind: TokenKind::Identifier,
                }],
            },
            Element::Block {
                context: "Elements".into(),
            },
        ],
    }
}
