//! OAuth 2.0 client registration.

/// A registered OAuth 2.0 client.
///
/// Client IDs are chosen by administrators and may contain characters that
/// are not valid storage keys, so backends are expected to derive their own
/// key from the ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Client {
    /// Client identifier used in OAuth flows. Immutable.
    pub id: String,
    /// Client secret.
    pub secret: String,
    /// Allowed redirect URIs.
    pub redirect_uris: Vec<String>,
    /// Clients allowed to mint tokens on behalf of this client.
    pub trusted_peers: Vec<String>,
    /// Public clients cannot keep a secret (native and browser apps).
    pub public: bool,
    /// Human readable name.
    pub name: String,
    /// Logo shown on the approval screen.
    pub logo_url: String,
}

impl Client {
    /// Returns `true` if `uri` is one of the registered redirect URIs.
    #[must_use]
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }
}
