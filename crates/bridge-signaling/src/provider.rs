//! Element-provider registry.
//!
//! The signaling transport delivers stanzas as an element name plus a JSON
//! payload. Parsers for the elements the bridge understands are installed
//! once at startup (`Bridge::start`), mirroring how a stanza-provider
//! manager works: unknown elements fail fast instead of being guessed at.

use crate::request::{ConferenceModifyRequest, ConferenceRequest, SignalingRequest};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use thiserror::Error;

/// Wire element name of the dialect v1 request.
pub const CONFERENCE_ELEMENT: &str = "conference";

/// Wire element name of the dialect v2 request.
pub const CONFERENCE_MODIFY_ELEMENT: &str = "conference-modify";

/// Wire element name of the health probe.
pub const HEALTH_CHECK_ELEMENT: &str = "health-check";

/// A parser from a JSON element payload to a [`SignalingRequest`].
pub type ElementParser = fn(&serde_json::Value) -> Result<SignalingRequest, ParseError>;

/// Failure to turn an element payload into a request.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No parser is registered for the element.
    #[error("unknown element: {0}")]
    UnknownElement(String),

    /// The payload did not match the element's schema.
    #[error("malformed {element} payload: {detail}")]
    Malformed { element: String, detail: String },
}

fn providers() -> &'static RwLock<HashMap<String, ElementParser>> {
    static PROVIDERS: OnceLock<RwLock<HashMap<String, ElementParser>>> = OnceLock::new();
    PROVIDERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a parser for an element name, replacing any previous one.
pub fn register(element: &str, parser: ElementParser) {
    let mut map = providers().write().unwrap_or_else(std::sync::PoisonError::into_inner);
    map.insert(element.to_string(), parser);
}

/// Register parsers for every element the bridge core understands.
pub fn register_defaults() {
    register(CONFERENCE_ELEMENT, parse_conference);
    register(CONFERENCE_MODIFY_ELEMENT, parse_conference_modify);
    register(HEALTH_CHECK_ELEMENT, parse_health_check);
}

/// Parse an element payload using the registered provider.
///
/// # Errors
///
/// [`ParseError::UnknownElement`] when nothing is registered for the name,
/// [`ParseError::Malformed`] when the payload does not fit.
pub fn parse(element: &str, payload: &serde_json::Value) -> Result<SignalingRequest, ParseError> {
    let parser = {
        let map = providers().read().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(element).copied()
    };
    match parser {
        Some(parser) => parser(payload),
        None => Err(ParseError::UnknownElement(element.to_string())),
    }
}

fn parse_conference(payload: &serde_json::Value) -> Result<SignalingRequest, ParseError> {
    serde_json::from_value::<ConferenceRequest>(payload.clone())
        .map(SignalingRequest::Conference)
        .map_err(|e| ParseError::Malformed {
            element: CONFERENCE_ELEMENT.to_string(),
            detail: e.to_string(),
        })
}

fn parse_conference_modify(payload: &serde_json::Value) -> Result<SignalingRequest, ParseError> {
    serde_json::from_value::<ConferenceModifyRequest>(payload.clone())
        .map(SignalingRequest::ConferenceModify)
        .map_err(|e| ParseError::Malformed {
            element: CONFERENCE_MODIFY_ELEMENT.to_string(),
            detail: e.to_string(),
        })
}

fn parse_health_check(_payload: &serde_json::Value) -> Result<SignalingRequest, ParseError> {
    Ok(SignalingRequest::HealthCheck)
}
