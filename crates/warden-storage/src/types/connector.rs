//! Upstream identity connector configuration.

/// A connector to an upstream identity source (LDAP, GitHub, SAML, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connector {
    /// Connector identifier, also used as the storage key. Immutable.
    pub id: String,
    /// Connector type, e.g. `ldap` or `github`.
    pub connector_type: String,
    /// Human readable name.
    pub name: String,
    /// Version of the configuration, bumped by whoever edits it.
    pub config_version: String,
    /// Connector specific configuration, usually JSON.
    pub config: Vec<u8>,
}
