//! The shared pull/resume protocol.
//!
//! Every pipeline stage (lexer, phrase parser, term parser) and the grammar
//! compiler engine advance through the same four-state step function. The
//! caller owns the loop: it calls `parse` (or `process`), inspects the
//! returned state, and either feeds more input, reads the single pending
//! output, supplies a requested resource, or stops at end of stream.
//!
//! This is deliberately not expressed as coroutines: an explicit state enum
//! keeps the pipeline portable to any driving model, from a synchronous
//! batch loop to an event loop.

/// Outcome of one `parse`/`process` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// The stage cannot make progress until the caller supplies more input
    /// (or marks the input as finished).
    InputNeeded,
    /// Exactly one output item is pending; it must be taken with `read`
    /// before the stage is stepped again.
    OutputAvailable,
    /// One or more external resources must be resolved and fed back before
    /// the stage can continue. Only the term parser and the grammar
    /// compiler ever report this.
    ResourceNeeded,
    /// Terminal state; no further output will be produced.
    Eof,
}

impl ParseResult {
    pub fn is_terminal(self) -> bool {
        self == ParseResult::Eof
    }
}
