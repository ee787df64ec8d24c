//! Reply forms produced by the bridge.

use serde::{Deserialize, Serialize};

/// Protocol-level error condition carried in an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCondition {
    BadRequest,
    Conflict,
    ItemNotFound,
    InternalServerError,
    ServiceUnavailable,
}

impl ErrorCondition {
    /// The wire name of this condition.
    #[must_use]
    pub const fn as_wire_str(self) -> &'static str {
        match self {
            ErrorCondition::BadRequest => "bad_request",
            ErrorCondition::Conflict => "conflict",
            ErrorCondition::ItemNotFound => "item_not_found",
            ErrorCondition::InternalServerError => "internal_server_error",
            ErrorCondition::ServiceUnavailable => "service_unavailable",
        }
    }
}

/// Dialect-v2 structured reason extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    ConferenceNotFound,
    ConferenceAlreadyExists,
}

/// An error reply: a condition code, optional human-readable text, an
/// optional v2 reason extension, and the graceful-shutdown marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub condition: ErrorCondition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ErrorReason>,
    /// Set on replies refusing work because the bridge is shutting down.
    #[serde(rename = "graceful-shutdown", default)]
    pub graceful_shutdown: bool,
}

impl ErrorReply {
    #[must_use]
    pub fn new(condition: ErrorCondition, text: impl Into<String>) -> Self {
        Self {
            condition,
            text: Some(text.into()),
            reason: None,
            graceful_shutdown: false,
        }
    }

    /// Attach the dialect-v2 structured reason extension.
    #[must_use]
    pub fn with_reason(mut self, reason: ErrorReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// The error returned for creates refused during graceful shutdown.
    #[must_use]
    pub fn graceful_shutdown() -> Self {
        Self {
            condition: ErrorCondition::ServiceUnavailable,
            text: None,
            reason: None,
            graceful_shutdown: true,
        }
    }
}

/// Dialect v1 result: the conference echoed back with its assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConferenceResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
}

/// Dialect v2 result: the conference addressed by meeting id, together with
/// the bridge-local id it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConferenceModifiedResult {
    pub meeting_id: String,
    pub conference_id: String,
}

/// Application name, version and host OS, for the version query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub application_name: String,
    pub version: String,
    pub os: String,
}

/// Any reply the bridge or a conference produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingReply {
    /// Dialect v1 success.
    Conference(ConferenceResult),
    /// Dialect v2 success.
    ConferenceModified(ConferenceModifiedResult),
    /// Empty `result` form (health check).
    Result,
    /// Version query result.
    Version(VersionInfo),
    /// Error wrapper.
    Error(ErrorReply),
}

impl SignalingReply {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, SignalingReply::Error(_))
    }

    /// The error reply, when this is one.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorReply> {
        match self {
            SignalingReply::Error(e) => Some(e),
            _ => None,
        }
    }
}
