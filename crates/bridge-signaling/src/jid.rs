//! Addressable conference names.
//!
//! Conference names arrive on the wire as bare JIDs (`room@conference.example.com`).
//! Only the syntactic shape is validated here; whether the room actually
//! exists upstream is not this component's concern.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of either part, in bytes.
const MAX_PART_LEN: usize = 1023;

/// Characters that may not appear in a localpart.
const FORBIDDEN_LOCALPART_CHARS: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// JID parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    /// The string has no `@` separator.
    #[error("missing '@' separator")]
    MissingSeparator,

    /// The localpart is empty.
    #[error("empty localpart")]
    EmptyLocalpart,

    /// The domainpart is empty.
    #[error("empty domainpart")]
    EmptyDomainpart,

    /// A part contains a character that is not allowed.
    #[error("illegal character {0:?}")]
    IllegalCharacter(char),

    /// A part exceeds the maximum length.
    #[error("part exceeds {MAX_PART_LEN} bytes")]
    PartTooLong,
}

/// A syntactically valid bare JID of the form `localpart@domainpart`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityBareJid {
    local: String,
    domain: String,
}

impl EntityBareJid {
    /// Parse and validate a bare JID.
    ///
    /// # Errors
    ///
    /// Returns a [`JidError`] describing the first violation found.
    pub fn parse(s: &str) -> Result<Self, JidError> {
        let (local, domain) = s.split_once('@').ok_or(JidError::MissingSeparator)?;

        if local.is_empty() {
            return Err(JidError::EmptyLocalpart);
        }
        if domain.is_empty() {
            return Err(JidError::EmptyDomainpart);
        }
        if local.len() > MAX_PART_LEN || domain.len() > MAX_PART_LEN {
            return Err(JidError::PartTooLong);
        }

        for c in local.chars() {
            if c.is_whitespace() || c.is_control() || FORBIDDEN_LOCALPART_CHARS.contains(&c) {
                return Err(JidError::IllegalCharacter(c));
            }
        }
        for c in domain.chars() {
            if c.is_whitespace() || c.is_control() || c == '@' || c == '/' {
                return Err(JidError::IllegalCharacter(c));
            }
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
        })
    }

    /// The part before the `@`.
    #[must_use]
    pub fn localpart(&self) -> &str {
        &self.local
    }

    /// The part after the `@`.
    #[must_use]
    pub fn domainpart(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for EntityBareJid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EntityBareJid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityBareJid {
    type Error = JidError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EntityBareJid> for String {
    fn from(jid: EntityBareJid) -> Self {
        jid.to_string()
    }
}
