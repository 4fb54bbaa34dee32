//! The signing key singleton.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_storage::{JsonWebKey, Keys, VerificationKey};

use super::{Entity, ResourceKind, SIGNING_KEY, nullable_vec};

/// Fixed object name of the keys.
pub(crate) const KEYS_NAME: &str = "openid-connect-keys";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationKeyBody {
    pub public_key: JsonWebKey,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<JsonWebKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_pub: Option<JsonWebKey>,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub verification_keys: Vec<VerificationKeyBody>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_rotation: OffsetDateTime,
}

impl Entity for Keys {
    type Body = KeysBody;

    const KIND: ResourceKind = SIGNING_KEY;

    fn resource_name(&self) -> String {
        KEYS_NAME.to_string()
    }

    fn to_body(&self) -> KeysBody {
        KeysBody {
            signing_key: self.signing_key.clone(),
            signing_key_pub: self.signing_key_pub.clone(),
            verification_keys: self
                .verification_keys
                .iter()
                .map(|key| VerificationKeyBody {
                    public_key: key.public_key.clone(),
                    expiry: key.expiry,
                })
                .collect(),
            next_rotation: self.next_rotation,
        }
    }

    fn from_body(_name: &str, body: KeysBody) -> Self {
        Self {
            signing_key: body.signing_key,
            signing_key_pub: body.signing_key_pub,
            verification_keys: body
                .verification_keys
                .into_iter()
                .map(|key| VerificationKey {
                    public_key: key.public_key,
                    expiry: key.expiry,
                })
                .collect(),
            next_rotation: body.next_rotation,
        }
    }

    fn keep_identity(&mut self, _previous: &Self) {}
}
