//! Discovery of the API server, namespace and credentials.
//!
//! Two sources are supported:
//!
//! - **in-cluster**: the pod's service account, mounted under
//!   `/var/run/secrets/kubernetes.io/serviceaccount/`, and the
//!   `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` variables injected
//!   by the kubelet
//! - **kubeconfig**: the current context of a kubeconfig file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use url::Url;
use warden_storage::{StorageError, StorageResult};

use crate::config::KubernetesConfig;
use crate::kubeconfig::Kubeconfig;
use crate::naming::validate_name;
use crate::transport::{Credentials, ServiceAccountToken, TlsMaterial};

/// Mount point of the service account secret.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const NAMESPACE_CLAIM: &str = "kubernetes.io/serviceaccount/namespace";

/// Everything needed to talk to one cluster.
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    /// API server root, e.g. `https://10.96.0.1:443/`.
    pub base_url: Url,
    /// Namespace the custom resources live in.
    pub namespace: String,
    /// Authentication applied to every request.
    pub credentials: Credentials,
    /// TLS settings of the HTTP client.
    pub tls: TlsMaterial,
}

impl ClusterConnection {
    /// Creates an unauthenticated connection. Mostly useful for tests and
    /// local proxies (`kubectl proxy`).
    #[must_use]
    pub fn new(base_url: Url, namespace: impl Into<String>) -> Self {
        Self {
            base_url,
            namespace: namespace.into(),
            credentials: Credentials::None,
            tls: TlsMaterial::default(),
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Resolves the connection described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the configuration is invalid or the
    /// bootstrap source cannot be read.
    pub async fn from_config(config: &KubernetesConfig) -> StorageResult<Self> {
        config.validate()?;
        match &config.kubeconfig_file {
            Some(path) => Self::from_kubeconfig(path).await,
            None => Self::in_cluster(&InClusterEnvironment::from_env()).await,
        }
    }

    /// Resolves the current context of a kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the file cannot be read or parsed, or
    /// its current context is incomplete.
    pub async fn from_kubeconfig(path: &Path) -> StorageResult<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            StorageError::misconfiguration(format!(
                "failed to read kubeconfig {}: {e}",
                path.display()
            ))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let connection = Kubeconfig::parse(&source)?.into_connection(base_dir).await?;
        check_namespace(&connection.namespace)?;

        tracing::info!(
            kubeconfig = %path.display(),
            server = %connection.base_url,
            namespace = %connection.namespace,
            "Using kubeconfig"
        );
        Ok(connection)
    }

    /// Resolves the in-cluster service account connection.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the service variables are missing, the
    /// CA or token cannot be read, or no namespace can be determined.
    pub async fn in_cluster(env: &InClusterEnvironment) -> StorageResult<Self> {
        let (Some(host), Some(port)) = (&env.host, &env.port) else {
            return Err(StorageError::misconfiguration(
                "in-cluster bootstrap requires KUBERNETES_SERVICE_HOST and KUBERNETES_SERVICE_PORT",
            ));
        };
        let base_url = service_url(host, port)?;

        let ca_path = env.service_account_dir.join("ca.crt");
        let ca = tokio::fs::read(&ca_path).await.map_err(|e| {
            StorageError::misconfiguration(format!(
                "failed to read service account CA {}: {e}",
                ca_path.display()
            ))
        })?;

        let token = Arc::new(ServiceAccountToken::new(
            env.service_account_dir.join("token"),
        ));
        // A missing token fails the bootstrap.
        let current = token.token().await?;

        let namespace = match env.pod_namespace.as_deref().filter(|ns| !ns.is_empty()) {
            Some(ns) => ns.to_string(),
            None => {
                let path = env.service_account_dir.join("namespace");
                match tokio::fs::read_to_string(&path).await {
                    Ok(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
                    _ => namespace_from_token(&current)?,
                }
            }
        };
        check_namespace(&namespace)?;

        tracing::info!(
            server = %base_url,
            namespace = %namespace,
            "Using in-cluster service account"
        );

        Ok(Self {
            base_url,
            namespace,
            credentials: Credentials::InCluster(token),
            tls: TlsMaterial {
                ca_pem: Some(ca),
                ..TlsMaterial::default()
            },
        })
    }
}

/// Inputs of the in-cluster bootstrap.
#[derive(Debug, Clone)]
pub struct InClusterEnvironment {
    /// `KUBERNETES_SERVICE_HOST`.
    pub host: Option<String>,
    /// `KUBERNETES_SERVICE_PORT`.
    pub port: Option<String>,
    /// `KUBERNETES_POD_NAMESPACE`.
    pub pod_namespace: Option<String>,
    /// Directory holding `ca.crt`, `token` and `namespace`.
    pub service_account_dir: PathBuf,
}

impl InClusterEnvironment {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("KUBERNETES_SERVICE_HOST").ok(),
            port: std::env::var("KUBERNETES_SERVICE_PORT").ok(),
            pod_namespace: std::env::var("KUBERNETES_POD_NAMESPACE").ok(),
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
        }
    }
}

fn service_url(host: &str, port: &str) -> StorageResult<Url> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    Url::parse(&format!("https://{host}:{port}/")).map_err(|e| {
        StorageError::misconfiguration(format!("invalid API server address {host}:{port}: {e}"))
    })
}

fn check_namespace(namespace: &str) -> StorageResult<()> {
    validate_name(namespace)
        .map_err(|e| StorageError::misconfiguration(format!("invalid namespace: {e}")))
}

/// Extracts the namespace claim from a service account JWT.
///
/// The signature is not checked; the token comes from the local filesystem.
fn namespace_from_token(token: &str) -> StorageResult<String> {
    let payload = token.split('.').nth(1).ok_or_else(|| {
        StorageError::misconfiguration("service account token is not a JWT")
    })?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| {
            StorageError::misconfiguration(format!("invalid service account token payload: {e}"))
        })?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).map_err(|e| {
        StorageError::misconfiguration(format!("invalid service account token claims: {e}"))
    })?;
    claims
        .get(NAMESPACE_CLAIM)
        .and_then(serde_json::Value::as_str)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            StorageError::misconfiguration(
                "could not determine namespace: set KUBERNETES_POD_NAMESPACE",
            )
        })
}
