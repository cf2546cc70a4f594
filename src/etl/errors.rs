//! Error reporting for the pipeline and the grammar compiler.
//!
//! Errors come in two tiers. Stream-level errors (unexpected tokens,
//! unbalanced blocks) are attached to the token stream as data and never
//! stop parsing. Compile- and resource-level errors are fatal for the
//! grammar that produced them; they are accumulated rather than
//! short-circuited, so independent failures (several unresolved imports,
//! say) all surface in one pass.

use crate::etl::position::Position;
use serde::Serialize;
use std::fmt;

/// Well-known error identifiers.
pub mod codes {
    pub const UNEXPECTED_CHARACTER: &str = "lexical.unexpected.character";
    pub const UNBALANCED_BLOCK: &str = "phrase.unbalanced.block";
    pub const UNCLOSED_BLOCK: &str = "phrase.unclosed.block";
    pub const UNEXPECTED_TOKEN: &str = "syntax.unexpected.token";
    pub const NO_GRAMMAR_DEFINITION: &str = "grammar.definition.missing";
    pub const MULTIPLE_GRAMMAR_DEFINITIONS: &str = "grammar.definition.multiple";
    pub const UNRESOLVED_PRODUCTION: &str = "grammar.production.unresolved";
    pub const UNKNOWN_CONTEXT: &str = "grammar.context.unknown";
    pub const IMPORT_FAILED: &str = "grammar.import.failed";
    pub const RESOURCE_UNREADABLE: &str = "resource.unreadable";
    pub const MALFORMED_GRAMMAR_SOURCE: &str = "grammar.source.malformed";
}

/// Where an error was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub system_id: String,
    pub position: Position,
}

impl SourceLocation {
    pub fn new(system_id: impl Into<String>, position: Position) -> Self {
        SourceLocation {
            system_id: system_id.into(),
            position,
        }
    }
}

/// One diagnostic: an identifier, message parameters, a location, and an
/// optional chained cause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub error_id: String,
    pub params: Vec<String>,
    pub location: SourceLocation,
    pub cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(error_id: &str, params: Vec<String>, location: SourceLocation) -> Self {
        ErrorInfo {
            error_id: error_id.to_string(),
            params,
            location,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Append `additions` to `target`, keeping every individual entry.
    pub fn merge(target: &mut Vec<ErrorInfo>, additions: impl IntoIterator<Item = ErrorInfo>) {
        target.extend(additions);
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.error_id, self.location.system_id, self.location.position
        )?;
        if !self.params.is_empty() {
            write!(f, " [{}]", self.params.join(", "))?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "; caused by {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as _)
    }
}
