//! Refresh tokens and offline sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_storage::{OfflineSessions, RefreshToken, RefreshTokenRef};

use super::auth::ClaimsBody;
use super::{
    Entity, OFFLINE_SESSIONS, REFRESH_TOKEN, ResourceKind, base64_bytes, nullable_vec,
};
use crate::naming::offline_token_name;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenBody {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub obsolete_token: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub claims: ClaimsBody,
    #[serde(rename = "connectorID", default)]
    pub connector_id: String,
    #[serde(with = "base64_bytes", default)]
    pub connector_data: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

impl Entity for RefreshToken {
    type Body = RefreshTokenBody;

    const KIND: ResourceKind = REFRESH_TOKEN;

    fn resource_name(&self) -> String {
        self.id.clone()
    }

    fn to_body(&self) -> RefreshTokenBody {
        RefreshTokenBody {
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            token: self.token.clone(),
            obsolete_token: self.obsolete_token.clone(),
            nonce: self.nonce.clone(),
            claims: ClaimsBody::from(&self.claims),
            connector_id: self.connector_id.clone(),
            connector_data: self.connector_data.clone(),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }

    fn from_body(name: &str, body: RefreshTokenBody) -> Self {
        Self {
            id: name.to_string(),
            token: body.token,
            obsolete_token: body.obsolete_token,
            created_at: body.created_at,
            last_used: body.last_used,
            client_id: body.client_id,
            connector_id: body.connector_id,
            connector_data: body.connector_data,
            scopes: body.scopes,
            nonce: body.nonce,
            claims: body.claims.into(),
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.id.clone_from(&previous.id);
    }
}

// =============================================================================
// Offline sessions
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRefBody {
    pub id: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSessionsBody {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "connID")]
    pub conn_id: String,
    #[serde(default, deserialize_with = "nullable_map")]
    pub refresh: BTreeMap<String, RefreshTokenRefBody>,
    #[serde(with = "base64_bytes", default)]
    pub connector_data: Vec<u8>,
}

fn nullable_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, RefreshTokenRefBody>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl Entity for OfflineSessions {
    type Body = OfflineSessionsBody;

    const KIND: ResourceKind = OFFLINE_SESSIONS;

    fn resource_name(&self) -> String {
        offline_token_name(&self.user_id, &self.conn_id)
    }

    fn to_body(&self) -> OfflineSessionsBody {
        OfflineSessionsBody {
            user_id: self.user_id.clone(),
            conn_id: self.conn_id.clone(),
            refresh: self
                .refresh
                .iter()
                .map(|(client_id, token)| {
                    (
                        client_id.clone(),
                        RefreshTokenRefBody {
                            id: token.id.clone(),
                            client_id: token.client_id.clone(),
                            created_at: token.created_at,
                            last_used: token.last_used,
                        },
                    )
                })
                .collect(),
            connector_data: self.connector_data.clone(),
        }
    }

    fn from_body(_name: &str, body: OfflineSessionsBody) -> Self {
        Self {
            user_id: body.user_id,
            conn_id: body.conn_id,
            refresh: body
                .refresh
                .into_iter()
                .map(|(client_id, token)| {
                    (
                        client_id,
                        RefreshTokenRef {
                            id: token.id,
                            client_id: token.client_id,
                            created_at: token.created_at,
                            last_used: token.last_used,
                        },
                    )
                })
                .collect(),
            connector_data: body.connector_data,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.user_id.clone_from(&previous.user_id);
        self.conn_id.clone_from(&previous.conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Resource, from_resource, new_resource};
    use time::macros::datetime;

    #[test]
    fn test_offline_sessions_round_trip() {
        let mut sessions = OfflineSessions {
            user_id: "u-1".into(),
            conn_id: "github".into(),
            ..Default::default()
        };
        sessions.refresh.insert(
            "example-app".into(),
            RefreshTokenRef {
                id: "rt-1".into(),
                client_id: "example-app".into(),
                created_at: datetime!(2024-05-01 10:00:00 UTC),
                last_used: datetime!(2024-05-02 10:00:00 UTC),
            },
        );

        let value = serde_json::to_value(new_resource("warden.dev/v1", "ns", &sessions)).unwrap();
        assert_eq!(value["metadata"]["name"], offline_token_name("u-1", "github"));
        assert_eq!(value["userID"], "u-1");
        assert_eq!(value["connID"], "github");
        assert_eq!(value["refresh"]["example-app"]["id"], "rt-1");
        assert_eq!(value["refresh"]["example-app"]["lastUsed"], "2024-05-02T10:00:00Z");

        let resource: Resource<OfflineSessionsBody> = serde_json::from_value(value).unwrap();
        assert_eq!(from_resource::<OfflineSessions>(resource), sessions);
    }

    #[test]
    fn test_refresh_token_name_is_id() {
        let token = RefreshToken {
            id: "rt-1".into(),
            token: "abc".into(),
            obsolete_token: String::new(),
            created_at: datetime!(2024-05-01 10:00:00 UTC),
            last_used: datetime!(2024-05-01 10:00:00 UTC),
            client_id: "example-app".into(),
            connector_id: "github".into(),
            connector_data: Vec::new(),
            scopes: vec!["offline_access".into()],
            nonce: String::new(),
            claims: Default::default(),
        };
        let value = serde_json::to_value(new_resource("warden.dev/v1", "ns", &token)).unwrap();
        assert_eq!(value["metadata"]["name"], "rt-1");
        assert_eq!(value["obsoleteToken"], "");
        assert_eq!(value["createdAt"], "2024-05-01T10:00:00Z");

        let resource: Resource<RefreshTokenBody> = serde_json::from_value(value).unwrap();
        assert_eq!(from_resource::<RefreshToken>(resource), token);
    }
}
