//! Local password credentials.

/// A username/password credential of the built-in password connector.
///
/// Emails are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Password {
    /// Email address, the lookup key. Immutable.
    pub email: String,
    /// Bcrypt hash of the password.
    pub hash: Vec<u8>,
    /// Display username.
    pub username: String,
    /// Stable user identifier.
    pub user_id: String,
}
