//! Custom resource representations of the domain entities.
//!
//! Every entity is stored as one object of its own kind. The entity fields
//! sit at the top level of the object next to `apiVersion`, `kind` and
//! `metadata`; there is no `spec`/`status` split.

mod auth;
mod client;
mod connector;
mod device;
mod keys;
mod password;
mod refresh_token;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) use device::{device_request_name, device_token_name};
pub(crate) use keys::KEYS_NAME;
pub(crate) use password::password_name;

// =============================================================================
// Object envelope
// =============================================================================

/// Standard object metadata.
///
/// Only the fields the adapter reads are named; everything else the API
/// server sets (uid, creationTimestamp, managedFields, ...) is kept in
/// `extra` so that a read-modify-write sends it back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Concurrency token. Never set by the adapter itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A stored object with entity body `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T> {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub body: T,
}

/// List metadata; only the continuation token is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMeta {
    #[serde(default, rename = "continue")]
    pub continue_token: Option<String>,
}

/// One page of a list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ResourceList<T> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default = "Vec::new", deserialize_with = "nullable_vec::deserialize")]
    pub items: Vec<T>,
}

// =============================================================================
// Kinds
// =============================================================================

/// Names under which one entity kind is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    pub kind: &'static str,
    pub plural: &'static str,
    pub singular: &'static str,
}

impl ResourceKind {
    /// Name of the custom resource definition in `group`.
    #[must_use]
    pub fn crd_name(&self, group: &str) -> String {
        format!("{}.{group}", self.plural)
    }

    #[must_use]
    pub fn list_kind(&self) -> String {
        format!("{}List", self.kind)
    }
}

pub const AUTH_CODE: ResourceKind = ResourceKind {
    kind: "AuthCode",
    plural: "authcodes",
    singular: "authcode",
};

pub const AUTH_REQUEST: ResourceKind = ResourceKind {
    kind: "AuthRequest",
    plural: "authrequests",
    singular: "authrequest",
};

pub const OAUTH2_CLIENT: ResourceKind = ResourceKind {
    kind: "OAuth2Client",
    plural: "oauth2clients",
    singular: "oauth2client",
};

// The plural is misspelled in deployed clusters and has to stay that way.
pub const SIGNING_KEY: ResourceKind = ResourceKind {
    kind: "SigningKey",
    plural: "signingkeies",
    singular: "signingkey",
};

pub const REFRESH_TOKEN: ResourceKind = ResourceKind {
    kind: "RefreshToken",
    plural: "refreshtokens",
    singular: "refreshtoken",
};

pub const PASSWORD: ResourceKind = ResourceKind {
    kind: "Password",
    plural: "passwords",
    singular: "password",
};

pub const OFFLINE_SESSIONS: ResourceKind = ResourceKind {
    kind: "OfflineSessions",
    plural: "offlinesessionses",
    singular: "offlinesessions",
};

pub const CONNECTOR: ResourceKind = ResourceKind {
    kind: "Connector",
    plural: "connectors",
    singular: "connector",
};

pub const DEVICE_REQUEST: ResourceKind = ResourceKind {
    kind: "DeviceRequest",
    plural: "devicerequests",
    singular: "devicerequest",
};

pub const DEVICE_TOKEN: ResourceKind = ResourceKind {
    kind: "DeviceToken",
    plural: "devicetokens",
    singular: "devicetoken",
};

/// Every kind the backend registers.
pub const ALL_KINDS: [ResourceKind; 10] = [
    AUTH_CODE,
    AUTH_REQUEST,
    OAUTH2_CLIENT,
    SIGNING_KEY,
    REFRESH_TOKEN,
    PASSWORD,
    OFFLINE_SESSIONS,
    CONNECTOR,
    DEVICE_REQUEST,
    DEVICE_TOKEN,
];

// =============================================================================
// Entity mapping
// =============================================================================

/// A domain entity stored as a custom resource.
pub(crate) trait Entity: Sized + Clone + Send + Sync {
    /// Wire representation of the entity fields.
    type Body: Clone + Serialize + DeserializeOwned + Send + Sync;

    const KIND: ResourceKind;

    /// Object name of this entity.
    fn resource_name(&self) -> String;

    fn to_body(&self) -> Self::Body;

    /// Rebuilds the entity from an object name and body.
    fn from_body(name: &str, body: Self::Body) -> Self;

    /// Restores the immutable identity fields after an updater ran.
    fn keep_identity(&mut self, previous: &Self);
}

/// Entities removed by garbage collection once expired.
pub(crate) trait Expiring: Entity {
    fn expiry(&self) -> OffsetDateTime;
}

/// Wraps an entity into a new object. Metadata other than name and
/// namespace is left for the API server to fill in.
pub(crate) fn new_resource<E: Entity>(
    api_version: &str,
    namespace: &str,
    entity: &E,
) -> Resource<E::Body> {
    Resource {
        api_version: api_version.to_string(),
        kind: E::KIND.kind.to_string(),
        metadata: ObjectMeta {
            name: entity.resource_name(),
            namespace: namespace.to_string(),
            ..ObjectMeta::default()
        },
        body: entity.to_body(),
    }
}

/// Reads the entity out of a stored object.
pub(crate) fn from_resource<E: Entity>(resource: Resource<E::Body>) -> E {
    E::from_body(&resource.metadata.name, resource.body)
}

/// Replaces the body of `previous` with `entity`, keeping every metadata
/// field (including the concurrency token) as read.
pub(crate) fn replace_body<E: Entity>(previous: Resource<E::Body>, entity: &E) -> Resource<E::Body> {
    Resource {
        body: entity.to_body(),
        ..previous
    }
}

// =============================================================================
// Field encodings
// =============================================================================

/// Byte fields as standard base64 strings; `null` and absent read as empty.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// Lists that may be written as `null`.
pub(crate) mod nullable_vec {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
    }
}
