//! Party identity for call signaling
//!
//! Parties are addressed by opaque string identifiers assigned by whatever
//! directory or authentication layer sits around this crate. The core never
//! interprets an id; it only routes messages by it and compares it for
//! equality.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Opaque identifier of one endpoint of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub String);

impl PartyId {
    /// Create a new party id
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PartyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Display information for a call participant.
///
/// Travels inside `call-offer` and `call-accepted` wire messages so each side
/// can render the other party while the call is being set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyInfo {
    /// Opaque party identifier
    pub id: PartyId,
    /// Human-readable name shown in call UI
    pub display_name: String,
    /// Optional reference to an avatar image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl PartyInfo {
    /// Create party info without an avatar
    pub fn new(id: impl Into<PartyId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    /// Attach an avatar reference
    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_party_id_display() {
        let id = PartyId::new("alice");
        assert_eq!(id.to_string(), "alice");
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_party_info_serialization_uses_camel_case() {
        let info = PartyInfo::new("alice", "Alice").with_avatar("avatars/alice.png");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"displayName\":\"Alice\""));
        assert!(json.contains("\"avatarRef\":\"avatars/alice.png\""));

        let back: PartyInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn test_party_info_avatar_omitted_when_absent() {
        let info = PartyInfo::new("bob", "Bob");
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("avatarRef"));
    }
}
