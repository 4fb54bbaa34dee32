//! Device authorization grant (RFC 8628) types.

use time::OffsetDateTime;

use super::auth::PkceChallenge;

/// A pending device authorization, looked up by the user code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Code the user types on the verification page. Case-insensitive.
    pub user_code: String,
    /// Code the device polls with.
    pub device_code: String,
    /// Client that started the flow.
    pub client_id: String,
    /// Client secret presented by the device.
    pub client_secret: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// When the request stops being valid.
    pub expiry: OffsetDateTime,
}

/// Polling state of a device, looked up by the device code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
    /// Code the device polls with. Immutable.
    pub device_code: String,
    /// Flow status, e.g. `pending` or `complete`.
    pub status: String,
    /// Token response handed to the device once complete.
    pub token: String,
    /// When the token stops being valid.
    pub expiry: OffsetDateTime,
    /// Last time the device polled.
    pub last_request_time: OffsetDateTime,
    /// Minimum seconds between polls.
    pub poll_interval_seconds: i64,
    /// PKCE challenge bound to the flow.
    pub pkce: PkceChallenge,
}
