//! Persisted data model for authentication sessions and assigned
//! compute-server records.
//!
//! Both lists are stored as JSON arrays under a single secret-store key each,
//! so the serde field names here are the wire format. They use camelCase to
//! stay compatible with records written by earlier builds of the extension.

use serde::{Deserialize, Serialize};

/// Account identity attached to an authentication session.
///
/// `id` is the stable account identifier (the user's email), `label` is the
/// human-readable display name shown in the host's account UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccount {
    pub id: String,
    pub label: String,
}

/// A signed-in session as persisted in the host's secret storage.
///
/// `id` is an opaque stable identifier generated at session creation; it is
/// distinct from the nonce used to correlate the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub id: String,
    pub access_token: String,
    pub account: SessionAccount,
    pub scopes: Vec<String>,
}

impl AuthSession {
    /// Whether this session covers every scope in `requested`.
    #[must_use]
    pub fn covers_scopes(&self, requested: &[String]) -> bool {
        requested.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// An assigned remote compute server, mirrored from the compute-assignment
/// backend and cached locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedServer {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Connection token for the notebook server, when one was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    //! Unit tests for the persisted wire format.
    use super::*;

    /// Validates `AuthSession` serialization for the persisted wire format
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the serialized form uses the `accessToken` field name.
    /// - Confirms a round-trip preserves all fields.
    #[test]
    fn test_session_wire_format() {
        let session = AuthSession {
            id: "session-1".to_string(),
            access_token: "token".to_string(),
            account: SessionAccount {
                id: "foo@example.com".to_string(),
                label: "Foo Bar".to_string(),
            },
            scopes: vec!["email".to_string(), "profile".to_string()],
        };

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"accessToken\":\"token\""));

        let back: AuthSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    /// Validates `AuthSession::covers_scopes` behavior for the scope subset
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures a requested subset of the session's scopes matches.
    /// - Ensures a scope the session does not hold fails the check.
    #[test]
    fn test_covers_scopes() {
        let session = AuthSession {
            id: "s".to_string(),
            access_token: "t".to_string(),
            account: SessionAccount { id: "a".to_string(), label: "A".to_string() },
            scopes: vec!["email".to_string(), "profile".to_string()],
        };

        assert!(session.covers_scopes(&["email".to_string()]));
        assert!(session.covers_scopes(&[]));
        assert!(!session.covers_scopes(&["admin".to_string()]));
    }

    /// Validates `AssignedServer` serialization for the optional token
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the `token` field is omitted when absent.
    #[test]
    fn test_assigned_server_omits_missing_token() {
        let server = AssignedServer {
            id: "srv-1".to_string(),
            display_name: "Team workspace".to_string(),
            base_url: "https://compute.nimbus.dev/srv-1".to_string(),
            token: None,
        };

        let json = serde_json::to_string(&server).unwrap();
        assert!(!json.contains("token"));
    }
}
