//! Bridge error types.
//!
//! Internal error kinds are converted at the routing boundary into protocol
//! error replies. The two dialects encode the same condition differently,
//! so the mapping takes the dialect of the request being answered.

use bridge_signaling::{Dialect, ErrorCondition, ErrorReason, ErrorReply};
use thiserror::Error;

/// Internal error taxonomy for request routing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Target conference does not exist. Carries the id (v1) or meeting id
    /// (v2) the request used.
    #[error("conference not found: {0}")]
    NotFound(String),

    /// Strict meeting-id collision on create.
    #[error("conference already exists: {0}")]
    AlreadyExists(String),

    /// Creation refused because graceful shutdown is in progress.
    #[error("bridge is in graceful shutdown")]
    GracefulShutdown,

    /// Conference name is not a syntactically valid addressable identifier.
    #[error("invalid conference name: {0}")]
    InvalidName(String),

    /// Malformed dialect envelope.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl BridgeError {
    /// Convert to the protocol error reply for the given dialect.
    ///
    /// | Condition | v1 | v2 | v2 extension |
    /// |-----------|----|----|--------------|
    /// | `NotFound` | `bad_request` | `item_not_found` | `CONFERENCE_NOT_FOUND` |
    /// | `AlreadyExists` | `bad_request` | `conflict` | `CONFERENCE_ALREADY_EXISTS` |
    /// | `GracefulShutdown` | graceful-shutdown error | graceful-shutdown error | — |
    /// | `InvalidName` | `bad_request` | `bad_request` | — |
    #[must_use]
    pub fn to_error_reply(&self, dialect: Dialect) -> ErrorReply {
        match self {
            BridgeError::NotFound(id) => {
                let text = format!("Conference not found for ID: {id}");
                match dialect {
                    Dialect::V1 => ErrorReply::new(ErrorCondition::BadRequest, text),
                    Dialect::V2 => ErrorReply::new(ErrorCondition::ItemNotFound, text)
                        .with_reason(ErrorReason::ConferenceNotFound),
                }
            }
            BridgeError::AlreadyExists(id) => {
                let text = format!("Conference already exists for ID: {id}");
                match dialect {
                    Dialect::V1 => ErrorReply::new(ErrorCondition::BadRequest, text),
                    Dialect::V2 => ErrorReply::new(ErrorCondition::Conflict, text)
                        .with_reason(ErrorReason::ConferenceAlreadyExists),
                }
            }
            BridgeError::GracefulShutdown => ErrorReply::graceful_shutdown(),
            BridgeError::InvalidName(_) => {
                ErrorReply::new(ErrorCondition::BadRequest, "Invalid conference name (not a JID)")
            }
            BridgeError::BadRequest(detail) => {
                ErrorReply::new(ErrorCondition::BadRequest, detail.clone())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_encoding_per_dialect() {
        let err = BridgeError::NotFound("does-not-exist".to_string());

        let v1 = err.to_error_reply(Dialect::V1);
        assert_eq!(v1.condition, ErrorCondition::BadRequest);
        assert_eq!(
            v1.text.as_deref(),
            Some("Conference not found for ID: does-not-exist")
        );
        assert!(v1.reason.is_none());

        let v2 = err.to_error_reply(Dialect::V2);
        assert_eq!(v2.condition, ErrorCondition::ItemNotFound);
        assert_eq!(v2.reason, Some(ErrorReason::ConferenceNotFound));
    }

    #[test]
    fn test_already_exists_encoding_per_dialect() {
        let err = BridgeError::AlreadyExists("m-1".to_string());

        let v1 = err.to_error_reply(Dialect::V1);
        assert_eq!(v1.condition, ErrorCondition::BadRequest);

        let v2 = err.to_error_reply(Dialect::V2);
        assert_eq!(v2.condition, ErrorCondition::Conflict);
        assert_eq!(v2.reason, Some(ErrorReason::ConferenceAlreadyExists));
        assert_eq!(
            v2.text.as_deref(),
            Some("Conference already exists for ID: m-1")
        );
    }

    #[test]
    fn test_graceful_shutdown_encoding_is_dialect_independent() {
        let err = BridgeError::GracefulShutdown;
        for dialect in [Dialect::V1, Dialect::V2] {
            let reply = err.to_error_reply(dialect);
            assert!(reply.graceful_shutdown);
            assert!(reply.reason.is_none());
        }
    }

    #[test]
    fn test_invalid_name_encoding() {
        let err = BridgeError::InvalidName("not a jid".to_string());
        let reply = err.to_error_reply(Dialect::V2);
        assert_eq!(reply.condition, ErrorCondition::BadRequest);
        assert_eq!(reply.text.as_deref(), Some("Invalid conference name (not a JID)"));
        assert!(reply.reason.is_none());
    }
}
