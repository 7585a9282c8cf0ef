//! Canonical wire-level error type for the crate.
//!
//! `WireError` is produced whenever bytes received from (or about to be handed
//! to) the transport do not form a well-formed message. The fragment-specific
//! error types in [`crate::fragment::error`] wrap it.

use thiserror::Error;

use crate::message::MessageType;

/// A message could not be decoded or encoded.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes were available than the fixed-size part requires.
    #[error("truncated message: needed {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },
    /// The size field disagrees with the number of bytes received.
    #[error("message size field declares {declared} bytes but {actual} were supplied")]
    SizeMismatch { declared: usize, actual: usize },
    /// A fixed-size message arrived with a different length.
    #[error("expected a {expected} byte message, got {actual} bytes")]
    UnexpectedSize { expected: usize, actual: usize },
    /// The message carries a type other than the one being decoded.
    #[error("unexpected message type {found}, expected {expected}")]
    UnexpectedType {
        expected: MessageType,
        found: MessageType,
    },
    /// The message cannot be represented with a 16-bit size field.
    #[error("message of {size} bytes exceeds the 16-bit size field")]
    TooLarge { size: usize },
}
