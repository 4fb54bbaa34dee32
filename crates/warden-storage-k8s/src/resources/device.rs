//! Device authorization flow state.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use warden_storage::{DeviceRequest, DeviceToken, PkceChallenge};

use super::{DEVICE_REQUEST, DEVICE_TOKEN, Entity, Expiring, ResourceKind, nullable_vec};

/// Object name of the device request for `user_code`, ignoring case.
pub(crate) fn device_request_name(user_code: &str) -> String {
    user_code.to_lowercase()
}

/// Object name of the device token for `device_code`, ignoring case.
pub(crate) fn device_token_name(device_code: &str) -> String {
    device_code.to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequestBody {
    pub device_code: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default, deserialize_with = "nullable_vec::deserialize")]
    pub scopes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

impl Entity for DeviceRequest {
    type Body = DeviceRequestBody;

    const KIND: ResourceKind = DEVICE_REQUEST;

    fn resource_name(&self) -> String {
        device_request_name(&self.user_code)
    }

    fn to_body(&self) -> DeviceRequestBody {
        DeviceRequestBody {
            device_code: self.device_code.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: self.scopes.clone(),
            expiry: self.expiry,
        }
    }

    // The user code is only kept as the (lowercased) object name.
    fn from_body(name: &str, body: DeviceRequestBody) -> Self {
        Self {
            user_code: name.to_uppercase(),
            device_code: body.device_code,
            client_id: body.client_id,
            client_secret: body.client_secret,
            scopes: body.scopes,
            expiry: body.expiry,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.user_code.clone_from(&previous.user_code);
    }
}

impl Expiring for DeviceRequest {
    fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTokenBody {
    #[serde(default)]
    pub device_code: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_request: OffsetDateTime,
    #[serde(default)]
    pub poll_interval: i64,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
}

impl Entity for DeviceToken {
    type Body = DeviceTokenBody;

    const KIND: ResourceKind = DEVICE_TOKEN;

    fn resource_name(&self) -> String {
        device_token_name(&self.device_code)
    }

    fn to_body(&self) -> DeviceTokenBody {
        DeviceTokenBody {
            device_code: self.device_code.clone(),
            status: self.status.clone(),
            token: self.token.clone(),
            expiry: self.expiry,
            last_request: self.last_request_time,
            poll_interval: self.poll_interval_seconds,
            code_challenge: self.pkce.code_challenge.clone(),
            code_challenge_method: self.pkce.code_challenge_method.clone(),
        }
    }

    // Objects written without the field fall back to the object name.
    fn from_body(name: &str, body: DeviceTokenBody) -> Self {
        let device_code = if body.device_code.is_empty() {
            name.to_string()
        } else {
            body.device_code
        };
        Self {
            device_code,
            status: body.status,
            token: body.token,
            expiry: body.expiry,
            last_request_time: body.last_request,
            poll_interval_seconds: body.poll_interval,
            pkce: PkceChallenge {
                code_challenge: body.code_challenge,
                code_challenge_method: body.code_challenge_method,
            },
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.device_code.clone_from(&previous.device_code);
    }
}

impl Expiring for DeviceToken {
    fn expiry(&self) -> OffsetDateTime {
        self.expiry
    }
}
