//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not valid JSON, or does not match the message shape.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// A command inside a batch could not be decoded.
    #[error("invalid command at index {index}: {source}")]
    InvalidCommand {
        /// Position of the command in the batch.
        index: usize,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A required identifier is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// An `evt` command carried no events.
    #[error("evt command must define at least one event")]
    EmptyEvents,
}

impl CodecError {
    /// Returns the batch position of the offending command, if known.
    pub fn command_index(&self) -> Option<usize> {
        match self {
            CodecError::InvalidCommand { index, .. } => Some(*index),
            _ => None,
        }
    }
}
