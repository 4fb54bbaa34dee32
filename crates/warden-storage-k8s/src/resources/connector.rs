//! Upstream identity connectors.

use serde::{Deserialize, Serialize};
use warden_storage::Connector;

use super::{CONNECTOR, Entity, ResourceKind, base64_bytes};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorBody {
    pub id: String,
    #[serde(rename = "type", default)]
    pub connector_type: String,
    #[serde(default)]
    pub name: String,
    /// Version of the connector configuration, unrelated to the object's
    /// own `metadata.resourceVersion`.
    #[serde(default)]
    pub resource_version: String,
    #[serde(with = "base64_bytes", default)]
    pub config: Vec<u8>,
}

impl Entity for Connector {
    type Body = ConnectorBody;

    const KIND: ResourceKind = CONNECTOR;

    fn resource_name(&self) -> String {
        self.id.clone()
    }

    fn to_body(&self) -> ConnectorBody {
        ConnectorBody {
            id: self.id.clone(),
            connector_type: self.connector_type.clone(),
            name: self.name.clone(),
            resource_version: self.config_version.clone(),
            config: self.config.clone(),
        }
    }

    fn from_body(name: &str, body: ConnectorBody) -> Self {
        Self {
            id: if body.id.is_empty() {
                name.to_string()
            } else {
                body.id
            },
            connector_type: body.connector_type,
            name: body.name,
            config_version: body.resource_version,
            config: body.config,
        }
    }

    fn keep_identity(&mut self, previous: &Self) {
        self.id.clone_from(&previous.id);
    }
}
