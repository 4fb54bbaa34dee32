//! OAuth2 clients.

use serde::{Deserialize, Serialize};
use warden_storage::Client;

use super::{Entity, OAUTH2_CLIENT, ResourceKind, nullable_vec};
use crate::naming::id_to_name;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBody {
    pub id: String,
    #[serde(default)]
    pub secret: String,
    #[serde(rename = "redirectURIs", default, deserialize_with = "nullable_vec::deserialize")]
    pub redirect_uris: Vec<String>,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub trusted_peers: Vec<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "logoURL", default)]
    pub logo_url: String,
}

impl Entity for Client {
    type Body = ClientBody;

    const KIND: ResourceKind = OAUTH2_CLIENT;

    fn resource_name(&self) -> String {
        id_to_name(&self.id)
    }

    fn to_body(&self) -> ClientBody {
        ClientBody {
            id: self.id.clone(),
            secret: self.secret.clone(),
            redirect_uris: self.redirect_uris.clone(),
            trusted_peers: self.trusted_peers.clone(),
            public: self.public,
            name: self.name.clone(),
            logo_url: self.logo_url.clone(),
        }
    }

    fn from_body(_name: &str, body: ClientBody) -> Self {
        Self {
            id: body.id,
            secret: body.secret,
            redirect_uris: body.redirect_uris,
            trusted_peers: body.trusted_peers,
            public: body.public,
            name: body.name,
            logo_url: body.logo_url,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.id.clone_from(&previous.id);
    }
}
