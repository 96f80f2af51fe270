//! Error types for the busline event bus.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure code carried by [`ReplyFailure`] values that were not produced by
/// an explicit recipient `fail()` call (timeouts, missing handlers).
pub const GENERIC_FAILURE_CODE: i32 = -1;

/// Classification of a failed request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyFailureKind {
    /// The recipient handler explicitly failed the request via `fail()`.
    RecipientFailure,

    /// No reply arrived before the delivery timeout elapsed.
    Timeout,

    /// No consumer was registered at the target address.
    NoHandlers,
}

/// Structured failure delivered to a requester instead of a reply body.
///
/// A `ReplyFailure` is both an error type and a message payload: `fail()`
/// wraps one in a reply envelope and routes it back over the bus exactly like
/// a normal reply. Timeout and no-handlers failures reuse the same shape but
/// are constructed by the bus itself, with [`GENERIC_FAILURE_CODE`] as code.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?} (code {code}): {message}")]
pub struct ReplyFailure {
    /// What went wrong.
    pub kind: ReplyFailureKind,
    /// Caller-supplied failure code, or [`GENERIC_FAILURE_CODE`].
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl ReplyFailure {
    /// Failure raised by a recipient handler through `fail()`.
    pub fn recipient(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: ReplyFailureKind::RecipientFailure,
            code,
            message: message.into(),
        }
    }

    /// No reply arrived within `timeout`.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            kind: ReplyFailureKind::Timeout,
            code: GENERIC_FAILURE_CODE,
            message: format!(
                "Timed out after waiting {}ms for a reply",
                timeout.as_millis()
            ),
        }
    }

    /// No consumer registered at `address`.
    pub fn no_handlers(address: &str) -> Self {
        Self {
            kind: ReplyFailureKind::NoHandlers,
            code: GENERIC_FAILURE_CODE,
            message: format!("No handlers for address {address}"),
        }
    }
}

/// Errors related to message codecs and the codec registry.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No codec registered under the requested name.
    #[error("No codec registered under name: {0}")]
    UnknownCodec(String),

    /// A codec with this name is already registered.
    #[error("A codec is already registered under name: {0}")]
    DuplicateCodec(String),

    /// The message body is not of the type this codec handles.
    #[error("Message body is not a {expected}")]
    WrongType {
        /// Type name the codec expected to find in the body.
        expected: &'static str,
    },

    /// JSON round trip failed inside a deserialize-based codec.
    #[error("JSON transform failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the send-side bus operations.
#[derive(Debug, Error)]
pub enum SendError {
    /// Point-to-point send targeted an address with no live consumer.
    #[error("No handlers registered for address: {0}")]
    NoHandlers(String),

    /// Codec lookup or transform failed while building or copying a message.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A request/reply exchange completed with a failure.
    #[error(transparent)]
    Failure(#[from] ReplyFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_failure_carries_code_and_message() {
        let failure = ReplyFailure::recipient(404, "missing");
        assert_eq!(failure.kind, ReplyFailureKind::RecipientFailure);
        assert_eq!(failure.code, 404);
        assert_eq!(failure.message, "missing");
    }

    #[test]
    fn test_bus_level_failures_use_generic_code() {
        let timeout = ReplyFailure::timeout(Duration::from_millis(250));
        assert_eq!(timeout.kind, ReplyFailureKind::Timeout);
        assert_eq!(timeout.code, GENERIC_FAILURE_CODE);
        assert!(timeout.message.contains("250ms"));

        let no_handlers = ReplyFailure::no_handlers("orders.create");
        assert_eq!(no_handlers.kind, ReplyFailureKind::NoHandlers);
        assert_eq!(no_handlers.code, GENERIC_FAILURE_CODE);
        assert!(no_handlers.message.contains("orders.create"));
    }

    #[test]
    fn test_reply_failure_survives_serde_round_trip() {
        let failure = ReplyFailure::recipient(503, "backend down");
        let json = serde_json::to_string(&failure).unwrap();
        let decoded: ReplyFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, failure);
    }
}
