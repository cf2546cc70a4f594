//! Property-based tests for the lexer and phrase parser.
//!
//! These ensure the streaming stages never panic, always terminate with
//! `Eof`, and keep their invariants over arbitrary inputs: block balance
//! (modulo flagged repairs) and chunked/whole equivalence.

use etl::etl::cell::Cell;
use etl::etl::lexer::Lexer;
use etl::etl::phrase::PhraseKind;
use etl::etl::position::Position;
use etl::etl::protocol::ParseResult;
use etl::etl::testing::{lex_source, phrase_source};
use etl::etl::tokens::Token;
use proptest::prelude::*;

/// Inputs over the characters the phrase layer reacts to, plus filler.
fn phrase_alphabet() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            Just("a".to_string()),
            Just("ident".to_string()),
            Just("42".to_string()),
            Just("\"s\"".to_string()),
            Just(";".to_string()),
            Just("{".to_string()),
            Just("}".to_string()),
            Just("\n".to_string()),
            Just(" ".to_string()),
            Just("// c\n".to_string()),
            Just("=".to_string()),
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn prop_phrase_stream_always_ends_with_eof(source in phrase_alphabet()) {
        let tokens = phrase_source(&source);
        prop_assert!(!tokens.is_empty());
        prop_assert_eq!(tokens.last().unwrap().kind, PhraseKind::Eof);
        prop_assert_eq!(
            tokens.iter().filter(|t| t.kind == PhraseKind::Eof).count(),
            1
        );
    }

    #[test]
    fn prop_blocks_balance_or_flag(source in phrase_alphabet()) {
        let tokens = phrase_source(&source);
        let starts = tokens.iter().filter(|t| t.kind == PhraseKind::StartBlock).count();
        let ends: Vec<_> = tokens.iter().filter(|t| t.kind == PhraseKind::EndBlock).collect();
        prop_assert!(starts == ends.len() || ends.iter().any(|t| t.has_error()));
    }

    #[test]
    fn prop_no_source_text_is_lost(source in phrase_alphabet()) {
        let tokens = phrase_source(&source);
        let reassembled: String = tokens
            .iter()
            .filter_map(|t| t.token.as_ref())
            .map(|t| t.text.as_str())
            .collect();
        prop_assert_eq!(reassembled, source);
    }

    #[test]
    fn prop_chunked_lexing_equals_whole(source in phrase_alphabet(), chunk in 1usize..7) {
        let whole: Vec<Token> = lex_source(&source);

        let mut lexer = Lexer::new();
        lexer.start("test:input", Position::start());
        let chars: Vec<char> = source.chars().collect();
        let mut fed = 0;
        let mut chunked = Vec::new();
        loop {
            match lexer.parse(fed >= chars.len()) {
                ParseResult::OutputAvailable => chunked.push(lexer.read()),
                ParseResult::InputNeeded => {
                    let next: String = chars[fed..(fed + chunk).min(chars.len())].iter().collect();
                    fed += next.chars().count();
                    lexer.push_chunk(&next);
                }
                ParseResult::Eof => break,
                other => prop_assert!(false, "unexpected state {:?}", other),
            }
        }
        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn prop_cell_roundtrip(values in proptest::collection::vec(any::<u32>(), 0..16)) {
        let mut cell = Cell::new();
        for value in &values {
            prop_assert!(!cell.has_element());
            cell.put(*value);
            prop_assert!(cell.has_element());
            prop_assert_eq!(cell.take(), *value);
        }
    }
}
