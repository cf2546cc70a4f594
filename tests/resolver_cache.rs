//! Resolver caching: single-flight compilation under concurrency and
//! cached failure attempts.

use etl::etl::grammar::bootstrap::GRAMMAR_GRAMMAR_PUBLIC_ID;
use etl::etl::resolver::GrammarResolver;
use etl::etl::resource::{ResourceReference, ResourceRequest};
use etl::etl::testing::MemoryOpener;
use std::sync::Arc;
use std::thread;

const CALC_GRAMMAR: &str = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.Calc "1.0" {
    context default Code {
        statement Let {
            token "let";
            property Name { kind identifier; };
            token "=";
            property Value { kind number; };
        };
    };
};
"#;

fn calc_resolver() -> GrammarResolver {
    GrammarResolver::with_opener(Arc::new(MemoryOpener::new(&[("calc.g.etl", CALC_GRAMMAR)])))
}

fn calc_request() -> ResourceRequest {
    ResourceRequest::new(ResourceReference::system("calc.g.etl"), "test")
}

#[test]
fn test_sequential_resolves_compile_once() {
    let resolver = calc_resolver();
    let first = resolver.resolve(calc_request());
    let second = resolver.resolve(calc_request());
    assert!(first.object.is_usable());
    assert!(Arc::ptr_eq(&first.object, &second.object));
    assert_eq!(resolver.compile_count(), 1);
}

#[test]
fn test_concurrent_resolves_are_single_flight() {
    let resolver = calc_resolver();
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| resolver.resolve(calc_request())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(
        resolver.compile_count(),
        1,
        "exactly one underlying compilation"
    );
    let first = &results[0];
    for other in &results[1..] {
        assert!(Arc::ptr_eq(&first.object, &other.object));
    }
}

#[test]
fn test_distinct_identities_compile_independently() {
    let resolver = GrammarResolver::with_opener(Arc::new(MemoryOpener::new(&[
        ("a.g.etl", CALC_GRAMMAR),
        ("b.g.etl", CALC_GRAMMAR),
    ])));
    let a = resolver.resolve(ResourceRequest::new(
        ResourceReference::system("a.g.etl"),
        "test",
    ));
    let b = resolver.resolve(ResourceRequest::new(
        ResourceReference::system("b.g.etl"),
        "test",
    ));
    assert!(!Arc::ptr_eq(&a.object, &b.object));
    assert_eq!(resolver.compile_count(), 2);
}

#[test]
fn test_failed_attempt_is_cached() {
    let resolver = GrammarResolver::with_opener(Arc::new(MemoryOpener::new(&[])));
    let request = ResourceRequest::new(ResourceReference::system("missing.g.etl"), "test");
    let first = resolver.resolve(request.clone());
    let second = resolver.resolve(request);
    assert!(!first.object.is_usable());
    assert!(!second.object.is_usable());
    assert_eq!(resolver.compile_count(), 1, "the attempt is not repeated");
}

#[test]
fn test_reserved_identity_never_touches_the_cache() {
    let resolver = GrammarResolver::with_opener(Arc::new(MemoryOpener::new(&[])));
    let request = ResourceRequest::new(
        ResourceReference::public(GRAMMAR_GRAMMAR_PUBLIC_ID),
        "test",
    );
    let resolved = resolver.resolve(request);
    assert!(resolved.object.is_usable());
    assert_eq!(resolver.compile_count(), 0);
}

#[test]
fn test_cyclic_import_fails_instead_of_deadlocking() {
    let a = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.A "1.0" {
    import b = my.B "1.0" from "b.g.etl";
    context default Code { production P { kind number; }; };
};
"#;
    let b = r#"doctype strict ETL.Grammar "0.3.0" context = Grammar;
grammar my.B "1.0" {
    import a = my.A "1.0" from "a.g.etl";
    context default Code { production P { kind number; }; };
};
"#;
    let resolver = GrammarResolver::with_opener(Arc::new(MemoryOpener::new(&[
        ("a.g.etl", a),
        ("b.g.etl", b),
    ])));
    let resolved = resolver.resolve(ResourceRequest::new(
        ResourceReference::system("a.g.etl"),
        "test",
    ));
    assert!(!resolved.object.is_usable());
}
