//! Error types for line parsing.

use thiserror::Error;

/// Failure to tokenize an IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line was empty or contained only whitespace.
    #[error("empty line")]
    Empty,

    /// A tag block or origin was present but no verb followed it.
    #[error("missing verb at position {position}")]
    MissingVerb {
        /// Byte offset where the verb was expected.
        position: usize,
    },
}
