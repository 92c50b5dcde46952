use std::result;

use thiserror::Error;

/// Result alias to reduce redundency in function return types
pub type Result<T> = result::Result<T, Error>;

/// Possible document error codes
#[derive(Debug, Error)]
pub enum Error {
    /// The input ended before a value could be read in full.
    #[error("unexpected end of buffer: needed {needed} more byte(s)")]
    EndOfBuffer {
        /// Number of bytes that were still required.
        needed: usize,
    },

    /// A variable-length integer does not fit into the target type.
    #[error("variable-length integer overflows its target type")]
    VarIntOverflow,

    /// The input holds a tag, flag or field this codec does not know about.
    #[error("unsupported encoding: {0}")]
    UnexpectedValue(String),

    /// String data is not valid UTF-8 / UTF-16.
    #[error("invalid string data")]
    InvalidString,

    /// JSON text embedded in a v1 update could not be parsed.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A referenced structure is not the kind the operation expects.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Malformed input that can only come from a caller-side logic bug,
    /// e.g. a zero-length delete range.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A positional operation addressed an index past the end of a sequence.
    #[error("index {index} is out of bounds for a sequence of length {len}")]
    OutOfBounds {
        /// Requested index.
        index: u32,
        /// Current visible length.
        len: u32,
    },

    /// Another transaction is currently open on the same document.
    #[error("another transaction is already open on this document")]
    TransactionInProgress,

    /// A sync protocol frame carries an unknown message type.
    #[error("unknown sync message type {0}")]
    UnknownMessage(u64),
}

impl Error {
    /// True if this error was raised while parsing untrusted bytes.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Error::EndOfBuffer { .. }
                | Error::VarIntOverflow
                | Error::UnexpectedValue(_)
                | Error::InvalidString
                | Error::InvalidJson(_)
                | Error::TypeMismatch(_)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_errors_are_classified() {
        assert!(Error::EndOfBuffer { needed: 1 }.is_decode_error());
        assert!(Error::VarIntOverflow.is_decode_error());
        assert!(!Error::TransactionInProgress.is_decode_error());
        assert!(!Error::InvariantViolation("zero length".into()).is_decode_error());
    }

    #[test]
    fn test_display() {
        let err = Error::OutOfBounds { index: 7, len: 3 };
        assert_eq!(
            err.to_string(),
            "index 7 is out of bounds for a sequence of length 3"
        );
    }
}
