//! Authorization flow types.
//!
//! [`AuthRequest`] tracks an authorization transaction while the user logs
//! in; [`AuthCode`] is the one-time code handed back to the client once the
//! login succeeded. Both are short-lived and carry an absolute expiry that
//! garbage collection uses.

use time::OffsetDateTime;

// =============================================================================
// Claims
// =============================================================================

/// Identity claims produced by a connector after a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    /// Stable user identifier assigned by the connector.
    pub user_id: String,
    /// Display username.
    pub username: String,
    /// Username the user prefers to be addressed by.
    pub preferred_username: String,
    /// Email address.
    pub email: String,
    /// Whether the connector verified the email address.
    pub email_verified: bool,
    /// Group memberships.
    pub groups: Vec<String>,
}

// =============================================================================
// PKCE
// =============================================================================

/// PKCE challenge sent with the authorization request (RFC 7636).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkceChallenge {
    /// The `code_challenge` parameter.
    pub code_challenge: String,
    /// The `code_challenge_method` parameter (`plain` or `S256`).
    pub code_challenge_method: String,
}

// =============================================================================
// Auth Request
// =============================================================================

/// A pending authorization request.
///
/// Created when the authorization endpoint is hit and updated a few times
/// while the user authenticates. `claims` and `connector_id` go from empty to
/// populated once; that transition is enforced by the caller's update
/// function, not by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Opaque identifier, also used as the storage key.
    pub id: String,
    /// Client that started the flow.
    pub client_id: String,
    /// Requested `response_type` values.
    pub response_types: Vec<String>,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Redirect URI the response is sent to.
    pub redirect_uri: String,
    /// OpenID Connect nonce.
    pub nonce: String,
    /// OAuth2 state value.
    pub state: String,
    /// Always show the approval screen even for previously approved clients.
    pub force_approval_prompt: bool,
    /// Set once the user authenticated with a connector.
    pub logged_in: bool,
    /// Claims of the authenticated user.
    pub claims: Claims,
    /// Connector the user authenticated with.
    pub connector_id: String,
    /// Opaque connector state.
    pub connector_data: Vec<u8>,
    /// When the request stops being valid.
    pub expiry: OffsetDateTime,
    /// PKCE challenge.
    pub pkce: PkceChallenge,
    /// Key used to sign the approval HMAC.
    pub hmac_key: Vec<u8>,
}

// =============================================================================
// Auth Code
// =============================================================================

/// A one-time authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCode {
    /// The code value, also used as the storage key.
    pub id: String,
    /// Client the code was issued to.
    pub client_id: String,
    /// Redirect URI the code was delivered to.
    pub redirect_uri: String,
    /// OpenID Connect nonce.
    pub nonce: String,
    /// Client state of the originating request.
    pub state: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Connector the user authenticated with.
    pub connector_id: String,
    /// Opaque connector state.
    pub connector_data: Vec<u8>,
    /// Claims of the authenticated user.
    pub claims: Claims,
    /// When the code stops being valid.
    pub expiry: OffsetDateTime,
    /// PKCE challenge bound to the code.
    pub pkce: PkceChallenge,
}
