use serde::Serialize;
use thiserror::Error;

/// Failure to produce a payload that is known to be correct.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PayloadError {
    #[error("chain has no steps")]
    EmptyChain,
    #[error("class `{0}` is not in the catalogue")]
    UnknownClass(String),
    #[error("round-trip check failed for {class}: declared {declared} properties, expected {expected}")]
    RoundTrip {
        class: String,
        declared: usize,
        expected: usize,
    },
    #[error("malformed serialized data at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}
