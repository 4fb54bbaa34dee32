//! Signing key material.

use serde_json::Value;
use time::OffsetDateTime;

/// A JSON Web Key (RFC 7517), kept as raw JSON.
///
/// The storage layer never interprets key material; it only persists it.
pub type JsonWebKey = Value;

/// A public key that remains valid for verification after rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationKey {
    /// The public key.
    pub public_key: JsonWebKey,
    /// When the key stops being accepted.
    pub expiry: OffsetDateTime,
}

/// The signing keys of the identity provider.
///
/// Exactly one instance exists. Rotation must not happen before
/// `next_rotation`; update functions are expected to check it because several
/// server instances observe the same deadline and race to rotate.
#[derive(Debug, Clone, PartialEq)]
pub struct Keys {
    /// Current private signing key.
    pub signing_key: Option<JsonWebKey>,
    /// Public half of the current signing key.
    pub signing_key_pub: Option<JsonWebKey>,
    /// Previously used public keys still accepted for verification.
    pub verification_keys: Vec<VerificationKey>,
    /// Earliest time the keys may be rotated.
    pub next_rotation: OffsetDateTime,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            signing_key: None,
            signing_key_pub: None,
            verification_keys: Vec::new(),
            next_rotation: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl Keys {
    /// Returns `true` if rotation is allowed at `now`.
    #[must_use]
    pub fn rotation_due(&self, now: OffsetDateTime) -> bool {
        self.signing_key.is_none() || now >= self.next_rotation
    }
}
