//! HTTP client construction and credential injection.
//!
//! The API server is reached through a single shared [`reqwest::Client`]
//! carrying the TLS settings. Credentials are applied per request so that the
//! in-cluster service account token can be renewed without rebuilding the
//! client.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Certificate, Identity, RequestBuilder};
use tokio::sync::RwLock;
use tokio::time::Instant;
use warden_storage::{StorageError, StorageResult};

/// How long a token read from disk is used before the file is read again.
pub const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// TLS
// =============================================================================

/// PEM encoded TLS material for the API server connection.
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    /// CA bundle used to verify the server certificate.
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate chain.
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client private key.
    pub client_key_pem: Option<Vec<u8>>,
    /// Skip server certificate verification.
    pub insecure_skip_verify: bool,
}

/// Builds the HTTP client used for every API call.
///
/// # Errors
///
/// Returns `Misconfiguration` if the TLS material cannot be parsed, or if
/// only one of client certificate and key is present.
pub fn build_http_client(tls: &TlsMaterial, timeout: Duration) -> StorageResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .use_rustls_tls();

    if let Some(ca) = &tls.ca_pem {
        let certs = Certificate::from_pem_bundle(ca).map_err(|e| {
            StorageError::misconfiguration(format!("invalid certificate authority: {e}"))
        })?;
        if certs.is_empty() {
            return Err(StorageError::misconfiguration(
                "certificate authority contains no certificates",
            ));
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    match (&tls.client_cert_pem, &tls.client_key_pem) {
        (Some(cert), Some(key)) => {
            let mut pem = cert.clone();
            if !pem.ends_with(b"\n") {
                pem.push(b'\n');
            }
            pem.extend_from_slice(key);
            let identity = Identity::from_pem(&pem).map_err(|e| {
                StorageError::misconfiguration(format!("invalid client certificate: {e}"))
            })?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(StorageError::misconfiguration(
                "client certificate and client key must be provided together",
            ));
        }
    }

    if tls.insecure_skip_verify {
        tracing::warn!("TLS verification of the Kubernetes API server is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| StorageError::misconfiguration(format!("failed to build HTTP client: {e}")))
}

// =============================================================================
// Credentials
// =============================================================================

/// Authentication applied to every request.
#[derive(Clone)]
pub enum Credentials {
    /// No authentication header.
    None,
    /// Static bearer token.
    Bearer(String),
    /// Static basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Bearer token re-read from the service account token file.
    InCluster(Arc<ServiceAccountToken>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::InCluster(source) => f.debug_tuple("InCluster").field(source).finish(),
        }
    }
}

impl Credentials {
    /// Adds the authentication header to `request`.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the in-cluster token has never been
    /// readable.
    pub async fn apply(&self, request: RequestBuilder) -> StorageResult<RequestBuilder> {
        Ok(match self {
            Self::None => request,
            Self::Bearer(token) => request.bearer_auth(token),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
            Self::InCluster(source) => request.bearer_auth(source.token().await?),
        })
    }
}

struct CachedToken {
    value: String,
    read_at: Instant,
}

/// Service account token with a short-lived in-memory cache.
///
/// Readers share the cached value. Only when the cache is older than
/// [`TOKEN_REFRESH_INTERVAL`] does one caller take the write lock and read
/// the file again.
pub struct ServiceAccountToken {
    path: PathBuf,
    cache: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountToken")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountToken {
    /// Creates a token source for `path`. The file is read on first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current token, reading the file if the cache is stale.
    ///
    /// When the file cannot be read but a previous token is cached, the old
    /// token keeps being used.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the file is unreadable and nothing is
    /// cached.
    pub async fn token(&self) -> StorageResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.read_at.elapsed() < TOKEN_REFRESH_INTERVAL
            {
                return Ok(cached.value.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref()
            && cached.read_at.elapsed() < TOKEN_REFRESH_INTERVAL
        {
            return Ok(cached.value.clone());
        }

        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim().to_string();
                tracing::debug!(path = %self.path.display(), "Read service account token");
                *cache = Some(CachedToken {
                    value: value.clone(),
                    read_at: Instant::now(),
                });
                Ok(value)
            }
            Err(e) => match cache.as_ref() {
                Some(cached) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to re-read service account token, using cached token"
                    );
                    Ok(cached.value.clone())
                }
                None => Err(StorageError::misconfiguration(format!(
                    "failed to read service account token {}: {e}",
                    self.path.display()
                ))),
            },
        }
    }
}
