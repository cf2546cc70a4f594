//! End-to-end grammar compilation: description text through the bootstrap
//! pipeline and the compiler engine, then documents parsed with the
//! resulting grammars.

use etl::etl::errors::codes;
use etl::etl::pipeline::TermPipeline;
use etl::etl::resolver::GrammarResolver;
use etl::etl::resource::{ResourceReference, ResourceRequest};
use etl::etl::term::{TermKind, TermToken};
use etl::etl::testing::MemoryOpener;
use std::sync::Arc;

const CALC_GRAMMAR: &str = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.Calc "1.0" {
    context default Code {
        statement Let {
            token "let";
            property Name { kind identifier; };
            token "=";
            property Value { ref Expr; };
        };
        production Expr { kind number; };
    };
};
"#;

const PAIR_GRAMMAR: &str = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.Pair "1.0" {
    context default Code {
        statement Pair {
            token "pair";
            ref A;
        };
        production A {
            token "a";
            optional { token "then"; ref B; };
        };
        production B {
            token "b";
            optional { token "then"; ref A; };
        };
    };
};
"#;

const LIB_GRAMMAR: &str = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.Lib "1.0" {
    context default Lib {
        production Num { kind number; };
    };
};
"#;

const MAIN_GRAMMAR: &str = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.Main "1.0" {
    import lib = my.Lib "1.0" from "lib.g.etl";
    context default Code {
        statement Use {
            token "use";
            property Value { ref lib.Num; };
        };
    };
};
"#;

fn resolver_over(entries: &[(&str, &str)]) -> GrammarResolver {
    GrammarResolver::with_opener(Arc::new(MemoryOpener::new(entries)))
}

fn resolve(resolver: &GrammarResolver, system_id: &str) -> Arc<etl::etl::grammar::CompiledGrammar> {
    let request = ResourceRequest::new(ResourceReference::system(system_id), "test");
    Arc::clone(&resolver.resolve(request).object)
}

fn parse_document(
    grammar: Arc<etl::etl::grammar::CompiledGrammar>,
    source: &str,
) -> Vec<TermToken> {
    let mut pipeline =
        TermPipeline::with_grammar("test:doc", grammar, None).expect("usable grammar");
    pipeline.run_to_end(source)
}

#[test]
fn test_compile_simple_grammar() {
    let resolver = resolver_over(&[("calc.g.etl", CALC_GRAMMAR)]);
    let grammar = resolve(&resolver, "calc.g.etl");
    assert!(grammar.is_usable(), "errors: {:?}", grammar.errors);
    assert_eq!(grammar.id.name, "my.Calc");
    assert_eq!(grammar.id.version, "1.0");
    assert_eq!(grammar.default_context, "Code");
    assert!(grammar.entry("Code.Let").is_some());
    assert!(grammar.entry("Code.Expr").is_some());
}

#[test]
fn test_forward_reference_is_linked() {
    // Let refs Expr, which is declared after it
    let resolver = resolver_over(&[("calc.g.etl", CALC_GRAMMAR)]);
    let grammar = resolve(&resolver, "calc.g.etl");
    assert!(grammar.call_sites.iter().all(|s| s.is_bound()));
}

#[test]
fn test_compiled_grammar_parses_documents() {
    let resolver = resolver_over(&[("calc.g.etl", CALC_GRAMMAR)]);
    let grammar = resolve(&resolver, "calc.g.etl");
    let tokens = parse_document(grammar, "let x = 5;\n");
    assert!(tokens.iter().all(|t| !t.has_errors()));
    let values: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TermKind::Value)
        .filter_map(|t| t.text())
        .collect();
    assert_eq!(values, vec!["x", "5"]);
}

#[test]
fn test_mutual_recursion_compiles_and_parses() {
    let resolver = resolver_over(&[("pair.g.etl", PAIR_GRAMMAR)]);
    let grammar = resolve(&resolver, "pair.g.etl");
    assert!(grammar.is_usable(), "errors: {:?}", grammar.errors);
    assert!(
        grammar.call_sites.iter().all(|s| s.is_bound()),
        "no unresolved call action remains"
    );
    let tokens = parse_document(grammar, "pair a then b then a;\n");
    assert!(tokens.iter().all(|t| !t.has_errors()));
}

#[test]
fn test_cross_grammar_import() {
    let resolver = resolver_over(&[
        ("lib.g.etl", LIB_GRAMMAR),
        ("main.g.etl", MAIN_GRAMMAR),
    ]);
    let grammar = resolve(&resolver, "main.g.etl");
    assert!(grammar.is_usable(), "errors: {:?}", grammar.errors);
    assert_eq!(grammar.descriptor.depends_on.len(), 1);
    assert_eq!(
        grammar.descriptor.depends_on[0].descriptor.identity,
        "lib.g.etl"
    );
    let tokens = parse_document(grammar, "use 42;\n");
    assert!(tokens.iter().all(|t| !t.has_errors()));
    let values: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TermKind::Value)
        .filter_map(|t| t.text())
        .collect();
    assert_eq!(values, vec!["42"]);
}

#[test]
fn test_missing_import_accumulates_and_marks_unusable() {
    let resolver = resolver_over(&[("main.g.etl", MAIN_GRAMMAR)]);
    let grammar = resolve(&resolver, "main.g.etl");
    assert!(!grammar.is_usable());
    assert!(grammar
        .errors
        .iter()
        .any(|e| e.error_id == codes::IMPORT_FAILED));
}

#[test]
fn test_grammar_without_definition_is_rejected() {
    let resolver = resolver_over(&[("empty.g.etl", "a b c;\n")]);
    let grammar = resolve(&resolver, "empty.g.etl");
    assert!(!grammar.is_usable());
    assert!(grammar
        .errors
        .iter()
        .any(|e| e.error_id == codes::NO_GRAMMAR_DEFINITION));
}

#[test]
fn test_two_grammar_definitions_are_rejected() {
    let source = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.One "1.0" { context default A { production P { kind number; }; }; };
grammar my.Two "1.0" { context default B { production P { kind number; }; }; };
"#;
    let resolver = resolver_over(&[("two.g.etl", source)]);
    let grammar = resolve(&resolver, "two.g.etl");
    assert!(!grammar.is_usable());
    assert!(grammar
        .errors
        .iter()
        .any(|e| e.error_id == codes::MULTIPLE_GRAMMAR_DEFINITIONS));
}

#[test]
fn test_document_resolves_its_own_grammar() {
    // a document naming its grammar by system id, resolved mid-stream
    let resolver = resolver_over(&[("calc.g.etl", CALC_GRAMMAR)]);
    let mut pipeline = TermPipeline::with_resolver("test:doc", &resolver);
    let tokens = pipeline.run_to_end(
        "doctype strict my.Calc \"1.0\" system \"calc.g.etl\";\nlet x = 7;\n",
    );
    assert!(tokens.iter().all(|t| !t.has_errors()), "{:?}", tokens);
    let values: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TermKind::Value)
        .filter_map(|t| t.text())
        .collect();
    assert!(values.contains(&"x"));
    assert!(values.contains(&"7"));
}
