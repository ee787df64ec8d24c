//! Inbound request forms for both signaling dialects.

use crate::reply::SignalingReply;
use serde::{Deserialize, Serialize};

/// Global conference id value meaning "not set" (v1 requests may omit it).
pub const GID_NOT_SET: i64 = -1;

/// Global conference id sentinel assigned to conferences created through the
/// v2 dialect, which does not carry a gid of its own.
pub const GID_MODIFY_DIALECT: i64 = -2;

/// The two signaling dialects understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Legacy `conference` element, addressed by bridge-local id.
    V1,
    /// `conference-modify` element, addressed by meeting id.
    V2,
}

/// Dialect v1 request (`conference` element).
///
/// All attributes are optional on the wire; a request without an `id` asks
/// the bridge to allocate a new conference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConferenceRequest {
    /// Bridge-local conference id; absent when creating.
    pub id: Option<String>,
    /// Legacy numeric "global" id, opaque to the bridge.
    pub gid: Option<i64>,
    /// Addressable conference name (JID-shaped).
    pub name: Option<String>,
    /// Externally supplied meeting id.
    pub meeting_id: Option<String>,
    pub rtcstats_enabled: bool,
    pub callstats_enabled: bool,
    /// Nested content/channel descriptors, opaque to the core.
    pub contents: Vec<serde_json::Value>,
}

/// Dialect v2 request (`conference-modify` element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConferenceModifyRequest {
    /// Externally supplied meeting id, the v2 addressing key.
    pub meeting_id: String,
    /// Whether the conference should be created if absent.
    #[serde(default)]
    pub create: bool,
    /// Addressable conference name (JID-shaped).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rtcstats_enabled: bool,
    #[serde(default)]
    pub callstats_enabled: bool,
}

impl ConferenceModifyRequest {
    /// A lookup-only request for an existing conference.
    #[must_use]
    pub fn lookup(meeting_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            create: false,
            name: None,
            rtcstats_enabled: false,
            callstats_enabled: false,
        }
    }
}

/// A parsed signaling request of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingRequest {
    /// Dialect v1 conference request.
    Conference(ConferenceRequest),
    /// Dialect v2 conference request.
    ConferenceModify(ConferenceModifyRequest),
    /// Health probe.
    HealthCheck,
    /// Application name / version / host OS query.
    Version,
}

impl SignalingRequest {
    /// The dialect whose error encoding applies to this request.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            SignalingRequest::ConferenceModify(_) => Dialect::V2,
            _ => Dialect::V1,
        }
    }
}

/// Callback through which the reply for an [`InboundRequest`] is delivered.
pub type ReplyCallback = Box<dyn FnOnce(SignalingReply) + Send + 'static>;

/// A delivered request together with its reply channel.
///
/// Routing hands this envelope to the target conference's ingress queue;
/// from that point the conference is solely responsible for invoking
/// `respond` exactly once.
pub struct InboundRequest {
    pub request: SignalingRequest,
    pub respond: ReplyCallback,
}

impl InboundRequest {
    pub fn new(request: SignalingRequest, respond: impl FnOnce(SignalingReply) + Send + 'static) -> Self {
        Self {
            request,
            respond: Box::new(respond),
        }
    }
}

impl std::fmt::Debug for InboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conference_request_wire_names() {
        let json = serde_json::json!({
            "id": "abc123",
            "meeting-id": "m-1",
            "rtcstats-enabled": true,
        });
        let req: ConferenceRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.id.as_deref(), Some("abc123"));
        assert_eq!(req.meeting_id.as_deref(), Some("m-1"));
        assert!(req.rtcstats_enabled);
        assert!(!req.callstats_enabled);
        assert!(req.contents.is_empty());
    }

    #[test]
    fn test_conference_modify_request_requires_meeting_id() {
        let result: Result<ConferenceModifyRequest, _> =
            serde_json::from_value(serde_json::json!({ "create": true }));
        assert!(result.is_err());
    }

    #[test]
    fn test_conference_modify_request_create_defaults_false() {
        let req: ConferenceModifyRequest =
            serde_json::from_value(serde_json::json!({ "meeting-id": "m-1" })).unwrap();
        assert_eq!(req.meeting_id, "m-1");
        assert!(!req.create);
    }

    #[test]
    fn test_dialect_selection() {
        assert_eq!(
            SignalingRequest::Conference(ConferenceRequest::default()).dialect(),
            Dialect::V1
        );
        assert_eq!(
            SignalingRequest::ConferenceModify(ConferenceModifyRequest::lookup("m")).dialect(),
            Dialect::V2
        );
        assert_eq!(SignalingRequest::HealthCheck.dialect(), Dialect::V1);
    }
}
