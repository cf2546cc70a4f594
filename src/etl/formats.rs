//! Language-neutral renderings of term-token streams.
//!
//! The term-token stream is the canonical consumption point of the whole
//! pipeline; this module renders one as JSON lines, one event per line,
//! for downstream tools that do not want to link against the parser.

use crate::etl::term::TermToken;
use std::io::{self, Write};

/// Render a term-token stream as JSON lines.
pub fn to_json_lines(tokens: &[TermToken]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for token in tokens {
        out.push_str(&serde_json::to_string(token)?);
        out.push('\n');
    }
    Ok(out)
}

/// Stream a term-token sequence as JSON lines into a writer.
pub fn write_json_lines<W: Write>(writer: &mut W, tokens: &[TermToken]) -> io::Result<()> {
    for token in tokens {
        serde_json::to_writer(&mut *writer, token)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
