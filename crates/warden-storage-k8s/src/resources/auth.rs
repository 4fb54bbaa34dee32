//! Authorization requests and codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_storage::{AuthCode, AuthRequest, Claims, PkceChallenge};

use super::{AUTH_CODE, AUTH_REQUEST, Entity, Expiring, ResourceKind, base64_bytes, nullable_vec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsBody {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub preferred_username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub groups: Vec<String>,
}

impl From<&Claims> for ClaimsBody {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id.clone(),
            username: claims.username.clone(),
            preferred_username: claims.preferred_username.clone(),
            email: claims.email.clone(),
            email_verified: claims.email_verified,
            groups: claims.groups.clone(),
        }
    }
}

impl From<ClaimsBody> for Claims {
    fn from(body: ClaimsBody) -> Self {
        Self {
            user_id: body.user_id,
            username: body.username,
            preferred_username: body.preferred_username,
            email: body.email,
            email_verified: body.email_verified,
            groups: body.groups,
        }
    }
}

// =============================================================================
// AuthRequest
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequestBody {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub response_types: Vec<String>,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub scopes: Vec<String>,
    #[serde(rename = "redirectURI", default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub force_approval_prompt: bool,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub claims: ClaimsBody,
    #[serde(rename = "connectorID", default)]
    pub connector_id: String,
    #[serde(with = "base64_bytes", default)]
    pub connector_data: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(rename = "code_challenge", default)]
    pub code_challenge: String,
    #[serde(rename = "code_challenge_method", default)]
    pub code_challenge_method: String,
    #[serde(rename = "hmac_key", with = "base64_bytes", default)]
    pub hmac_key: Vec<u8>,
}

impl Entity for AuthRequest {
    type Body = AuthRequestBody;

    const KIND: ResourceKind = AUTH_REQUEST;

    fn resource_name(&self) -> String {
        self.id.clone()
    }

    fn to_body(&self) -> AuthRequestBody {
        AuthRequestBody {
            client_id: self.client_id.clone(),
            response_types: self.response_types.clone(),
            scopes: self.scopes.clone(),
            redirect_uri: self.redirect_uri.clone(),
            nonce: self.nonce.clone(),
            state: self.state.clone(),
            force_approval_prompt: self.force_approval_prompt,
            logged_in: self.logged_in,
            claims: ClaimsBody::from(&self.claims),
            connector_id: self.connector_id.clone(),
            connector_data: self.connector_data.clone(),
            expiry: self.expiry,
            code_challenge: self.pkce.code_challenge.clone(),
            code_challenge_method: self.pkce.code_challenge_method.clone(),
            hmac_key: self.hmac_key.clone(),
        }
    }

    fn from_body(name: &str, body: AuthRequestBody) -> Self {
        Self {
            id: name.to_string(),
            client_id: body.client_id,
            response_types: body.response_types,
            scopes: body.scopes,
            redirect_uri: body.redirect_uri,
            nonce: body.nonce,
            state: body.state,
            force_approval_prompt: body.force_approval_prompt,
            logged_in: body.logged_in,
            claims: body.claims.into(),
            connector_id: body.connector_id,
            connector_data: body.connector_data,
            expiry: body.expiry,
            pkce: PkceChallenge {
                code_challenge: body.code_challenge,
                code_challenge_method: body.code_challenge_method,
            },
            hmac_key: body.hmac_key,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.id.clone_from(&previous.id);
    }
}

impl Expiring for AuthRequest {
    fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }
}

// =============================================================================
// AuthCode
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCodeBody {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub scopes: Vec<String>,
    #[serde(rename = "redirectURI", default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub claims: ClaimsBody,
    #[serde(rename = "connectorID", default)]
    pub connector_id: String,
    #[serde(with = "base64_bytes", default)]
    pub connector_data: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(rename = "code_challenge", default)]
    pub code_challenge: String,
    #[serde(rename = "code_challenge_method", default)]
    pub code_challenge_method: String,
}

impl Entity for AuthCode {
    type Body = AuthCodeBody;

    const KIND: ResourceKind = AUTH_CODE;

    fn resource_name(&self) -> String {
        self.id.clone()
    }

    fn to_body(&self) -> AuthCodeBody {
        AuthCodeBody {
            client_id: self.client_id.clone(),
            scopes: self.scopes.clone(),
            redirect_uri: self.redirect_uri.clone(),
            nonce: self.nonce.clone(),
            state: self.state.clone(),
            claims: ClaimsBody::from(&self.claims),
            connector_id: self.connector_id.clone(),
            connector_data: self.connector_data.clone(),
            expiry: self.expiry,
            code_challenge: self.pkce.code_challenge.clone(),
            code_challenge_method: self.pkce.code_challenge_method.clone(),
        }
    }

    fn from_body(name: &str, body: AuthCodeBody) -> Self {
        Self {
            id: name.to_string(),
            client_id: body.client_id,
            redirect_uri: body.redirect_uri,
            nonce: body.nonce,
            state: body.state,
            scopes: body.scopes,
            connector_id: body.connector_id,
            connector_data: body.connector_data,
            claims: body.claims.into(),
            expiry: body.expiry,
            pkce: PkceChallenge {
                code_challenge: body.code_challenge,
                code_challenge_method: body.code_challenge_method,
            },
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.id.clone_from(&previous.id);
    }
}

impl Expiring for AuthCode {
    fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Resource, from_resource, new_resource};
    use serde_json::json;
    use time::macros::datetime;

    fn auth_request() -> AuthRequest {
        AuthRequest {
            id: "req-1".into(),
            client_id: "example-app".into(),
            response_types: vec!["code".into()],
            scopes: vec!["openid".into(), "email".into()],
            redirect_uri: "https://app.example.com/callback".into(),
            nonce: "n-0S6_WzA2Mj".into(),
            state: "af0ifjsldkj".into(),
            force_approval_prompt: true,
            logged_in: true,
            claims: Claims {
                user_id: "u-1".into(),
                username: "jane".into(),
                preferred_username: "jane.doe".into(),
                email: "jane@example.com".into(),
                email_verified: true,
                groups: vec!["admins".into()],
            },
            connector_id: "github".into(),
            connector_data: b"{\"token\":\"x\"}".to_vec(),
            expiry: datetime!(2030-01-01 12:00:00 UTC),
            pkce: PkceChallenge {
                code_challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into(),
                code_challenge_method: "S256".into(),
            },
            hmac_key: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn test_auth_request_wire_format() {
        let resource = new_resource("warden.dev/v1", "identity", &auth_request());
        let value = serde_json::to_value(&resource).unwrap();

        assert_eq!(value["apiVersion"], "warden.dev/v1");
        assert_eq!(value["kind"], "AuthRequest");
        assert_eq!(value["metadata"], json!({"name": "req-1", "namespace": "identity"}));
        assert_eq!(value["clientID"], "example-app");
        assert_eq!(value["redirectURI"], "https://app.example.com/callback");
        assert_eq!(value["forceApprovalPrompt"], true);
        assert_eq!(value["claims"]["userID"], "u-1");
        assert_eq!(value["claims"]["preferredUsername"], "jane.doe");
        assert_eq!(value["claims"]["emailVerified"], true);
        assert_eq!(value["connectorID"], "github");
        assert_eq!(value["connectorData"], "eyJ0b2tlbiI6IngifQ==");
        assert_eq!(value["expiry"], "2030-01-01T12:00:00Z");
        assert_eq!(value["code_challenge_method"], "S256");
        assert_eq!(value["hmac_key"], "AQIDBA==");
    }

    #[test]
    fn test_auth_request_round_trip() {
        let request = auth_request();
        let value = serde_json::to_value(new_resource("warden.dev/v1", "ns", &request)).unwrap();
        let resource: Resource<AuthRequestBody> = serde_json::from_value(value).unwrap();
        assert_eq!(from_resource::<AuthRequest>(resource), request);
    }

    #[test]
    fn test_auth_code_tolerates_nulls() {
        let resource: Resource<AuthCodeBody> = serde_json::from_value(json!({
            "apiVersion": "warden.dev/v1",
            "kind": "AuthCode",
            "metadata": {"name": "code-1", "resourceVersion": "7"},
            "clientID": "example-app",
            "scopes": null,
            "connectorData": null,
            "claims": {"userID": "u-1", "groups": null},
            "expiry": "2030-01-01T00:00:00Z"
        }))
        .unwrap();

        let code = from_resource::<AuthCode>(resource);
        assert_eq!(code.id, "code-1");
        assert!(code.scopes.is_empty());
        assert!(code.connector_data.is_empty());
        assert_eq!(code.claims.user_id, "u-1");
        assert_eq!(code.expiry, datetime!(2030-01-01 00:00:00 UTC));
    }

    #[test]
    fn test_keep_identity() {
        let original = auth_request();
        let mut changed = original.clone();
        changed.id = "other".into();
        changed.logged_in = false;
        changed.keep_identity(&original);
        assert_eq!(changed.id, "req-1");
        assert!(!changed.logged_in);
    }
}
