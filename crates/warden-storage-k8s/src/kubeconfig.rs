//! Kubeconfig file parsing.
//!
//! Only the subset needed to reach one cluster is modelled: the current
//! context, its cluster (server, CA, TLS verification) and its user (client
//! certificate, token or basic auth).

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use url::Url;
use warden_storage::{StorageError, StorageResult};

use crate::bootstrap::ClusterConnection;
use crate::transport::{Credentials, TlsMaterial};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Kubeconfig {
    #[serde(default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    #[serde(default)]
    certificate_authority: Option<String>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: User,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct User {
    #[serde(default)]
    client_certificate: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    token_file: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl Kubeconfig {
    pub(crate) fn parse(source: &str) -> StorageResult<Self> {
        serde_yaml::from_str(source)
            .map_err(|e| StorageError::misconfiguration(format!("invalid kubeconfig: {e}")))
    }

    /// Resolves the current context into a connection. Relative file
    /// references are resolved against `base_dir`.
    pub(crate) async fn into_connection(self, base_dir: &Path) -> StorageResult<ClusterConnection> {
        let context_name = self
            .current_context
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StorageError::misconfiguration("kubeconfig has no current-context"))?;

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .map(|c| &c.context)
            .ok_or_else(|| {
                StorageError::misconfiguration(format!(
                    "kubeconfig context '{context_name}' not found"
                ))
            })?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| {
                StorageError::misconfiguration(format!(
                    "kubeconfig cluster '{}' not found",
                    context.cluster
                ))
            })?;

        let anonymous = User::default();
        let user = match &context.user {
            Some(name) => self
                .users
                .iter()
                .find(|u| &u.name == name)
                .map(|u| &u.user)
                .ok_or_else(|| {
                    StorageError::misconfiguration(format!("kubeconfig user '{name}' not found"))
                })?,
            None => &anonymous,
        };

        let base_url = Url::parse(&cluster.server).map_err(|e| {
            StorageError::misconfiguration(format!(
                "invalid cluster server '{}': {e}",
                cluster.server
            ))
        })?;

        let tls = TlsMaterial {
            ca_pem: load_material(
                base_dir,
                cluster.certificate_authority.as_deref(),
                cluster.certificate_authority_data.as_deref(),
                "certificate-authority",
            )
            .await?,
            client_cert_pem: load_material(
                base_dir,
                user.client_certificate.as_deref(),
                user.client_certificate_data.as_deref(),
                "client-certificate",
            )
            .await?,
            client_key_pem: load_material(
                base_dir,
                user.client_key.as_deref(),
                user.client_key_data.as_deref(),
                "client-key",
            )
            .await?,
            insecure_skip_verify: cluster.insecure_skip_tls_verify,
        };

        let credentials = user_credentials(base_dir, user).await?;

        let namespace = context
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(ClusterConnection {
            base_url,
            namespace,
            credentials,
            tls,
        })
    }
}

async fn user_credentials(base_dir: &Path, user: &User) -> StorageResult<Credentials> {
    if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(Credentials::Bearer(token.to_string()));
    }
    if let Some(file) = &user.token_file {
        let path = resolve(base_dir, file);
        let token = read_file(&path, "tokenFile").await?;
        let token = String::from_utf8(token).map_err(|_| {
            StorageError::misconfiguration(format!("token file {} is not UTF-8", path.display()))
        })?;
        return Ok(Credentials::Bearer(token.trim().to_string()));
    }
    if let Some(username) = &user.username {
        return Ok(Credentials::Basic {
            username: username.clone(),
            password: user.password.clone().unwrap_or_default(),
        });
    }
    Ok(Credentials::None)
}

/// Inline base64 data wins over a file reference.
async fn load_material(
    base_dir: &Path,
    file: Option<&str>,
    data: Option<&str>,
    field: &str,
) -> StorageResult<Option<Vec<u8>>> {
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        let decoded = STANDARD.decode(data.trim()).map_err(|e| {
            StorageError::misconfiguration(format!("invalid base64 in {field}-data: {e}"))
        })?;
        return Ok(Some(decoded));
    }
    match file.filter(|f| !f.is_empty()) {
        Some(file) => Ok(Some(read_file(&resolve(base_dir, file), field).await?)),
        None => Ok(None),
    }
}

fn resolve(base_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

async fn read_file(path: &Path, field: &str) -> StorageResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        StorageError::misconfiguration(format!(
            "failed to read {field} {}: {e}",
            path.display()
        ))
    })
}
