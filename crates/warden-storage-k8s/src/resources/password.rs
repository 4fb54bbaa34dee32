//! Local password credentials.

use serde::{Deserialize, Serialize};
use warden_storage::Password;

use super::{Entity, PASSWORD, ResourceKind, base64_bytes};
use crate::naming::id_to_name;

/// Object name of the credential for `email`, ignoring case.
pub(crate) fn password_name(email: &str) -> String {
    id_to_name(&email.to_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordBody {
    pub email: String,
    #[serde(with = "base64_bytes", default)]
    pub hash: Vec<u8>,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "userID", default)]
    pub user_id: String,
}

impl Entity for Password {
    type Body = PasswordBody;

    const KIND: ResourceKind = PASSWORD;

    fn resource_name(&self) -> String {
        password_name(&self.email)
    }

    fn to_body(&self) -> PasswordBody {
        PasswordBody {
            email: self.email.to_lowercase(),
            hash: self.hash.clone(),
            username: self.username.clone(),
            user_id: self.user_id.clone(),
        }
    }

    fn from_body(_name: &str, body: PasswordBody) -> Self {
        Self {
            email: body.email,
            hash: body.hash,
            username: body.username,
            user_id: body.user_id,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.email.clone_from(&previous.email);
    }
}
