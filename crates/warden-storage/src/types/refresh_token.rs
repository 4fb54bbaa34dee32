//! Refresh tokens and offline sessions.
//!
//! A [`RefreshToken`] is rotated on every use: the new value replaces
//! `token` and the previous value moves to `obsolete_token`, so that a client
//! retrying a refresh whose response it lost is still recognized for a short
//! while. Backends serialize rotations of the same token so that at most one
//! rotation is in flight at a time.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use super::auth::Claims;

// =============================================================================
// Refresh Token
// =============================================================================

/// A long-lived refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    /// Identifier, also used as the storage key. Immutable.
    pub id: String,
    /// Current secret value.
    pub token: String,
    /// Previous secret value, accepted while a rotation settles.
    pub obsolete_token: String,
    /// When the token was issued.
    pub created_at: OffsetDateTime,
    /// When the token was last exchanged.
    pub last_used: OffsetDateTime,
    /// Client the token was issued to.
    pub client_id: String,
    /// Connector the user authenticated with.
    pub connector_id: String,
    /// Opaque connector state used to refresh upstream identity.
    pub connector_data: Vec<u8>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// OpenID Connect nonce of the original request.
    pub nonce: String,
    /// Claims of the user.
    pub claims: Claims,
}

impl RefreshToken {
    /// Returns `true` if `value` matches the current or the obsolete token.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        !value.is_empty() && (self.token == value || self.obsolete_token == value)
    }
}

// =============================================================================
// Offline Sessions
// =============================================================================

/// Reference from an offline session to one of its refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRef {
    /// ID of the referenced refresh token.
    pub id: String,
    /// Client the token was issued to.
    pub client_id: String,
    /// When the token was issued.
    pub created_at: OffsetDateTime,
    /// When the token was last exchanged.
    pub last_used: OffsetDateTime,
}

/// Refresh tokens held by one user through one connector.
///
/// No single field is unique, so backends key this on the
/// (`user_id`, `conn_id`) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineSessions {
    /// User the session belongs to. Immutable.
    pub user_id: String,
    /// Connector the user authenticated with. Immutable.
    pub conn_id: String,
    /// Refresh tokens keyed by client ID.
    pub refresh: BTreeMap<String, RefreshTokenRef>,
    /// Opaque connector state.
    pub connector_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn token(current: &str, obsolete: &str) -> RefreshToken {
        RefreshToken {
            id: "rt-1".to_string(),
            token: current.to_string(),
            obsolete_token: obsolete.to_string(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            last_used: datetime!(2024-01-01 00:00 UTC),
            client_id: "client".to_string(),
            connector_id: "local".to_string(),
            connector_data: Vec::new(),
            scopes: vec!["openid".to_string()],
            nonce: String::new(),
            claims: Claims::default(),
        }
    }

    #[test]
    fn test_matches_current_and_obsolete() {
        let rt = token("new", "old");
        assert!(rt.matches("new"));
        assert!(rt.matches("old"));
        assert!(!rt.matches("other"));
    }

    #[test]
    fn test_empty_obsolete_never_matches() {
        let rt = token("new", "");
        assert!(!rt.matches(""));
    }
}
