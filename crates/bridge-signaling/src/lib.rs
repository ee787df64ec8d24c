//! Signaling dialects for the conference bridge control plane.
//!
//! This crate holds the wire-level request and reply forms the bridge core
//! consumes and produces. Two dialects of the conference-control protocol
//! are supported:
//!
//! - **v1** (`conference` element): legacy, addressed by the bridge-local
//!   conference id, with lenient meeting-id semantics.
//! - **v2** (`conference-modify` element): meeting-id-centric, with an
//!   explicit `create` flag and richer error conditions.
//!
//! The transport that delivers these requests is out of scope; callers hand
//! the core an [`InboundRequest`] (a parsed request plus a reply callback)
//! and the core (or the target conference) invokes the callback with a
//! [`SignalingReply`].

#![warn(clippy::pedantic)]

pub mod jid;
pub mod provider;
pub mod reply;
pub mod request;

pub use jid::{EntityBareJid, JidError};
pub use reply::{
    ConferenceModifiedResult, ConferenceResult, ErrorCondition, ErrorReason, ErrorReply,
    SignalingReply, VersionInfo,
};
pub use request::{
    ConferenceModifyRequest, ConferenceRequest, Dialect, InboundRequest, ReplyCallback,
    SignalingRequest, GID_MODIFY_DIALECT, GID_NOT_SET,
};
