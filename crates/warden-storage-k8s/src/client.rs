//! REST client for the Kubernetes API server.
//!
//! Resource URLs follow
//! `{api|apis}/{group/version}[/namespaces/{ns}]/{plural}[/{name}]`. The
//! core `v1` group lives under `api/`, everything else under `apis/`.
//!
//! Status codes are mapped onto [`StorageError`]:
//!
//! | status | method | error |
//! |--------|--------|-------|
//! | 404 | any | `NotFound` |
//! | 409 | POST | `AlreadyExists` |
//! | 409 | PUT | `Conflict` |
//! | other non-2xx | any | `Transport` |

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use warden_storage::{StorageError, StorageResult};

use crate::bootstrap::ClusterConnection;
use crate::naming::validate_name;
use crate::resources::ResourceList;
use crate::shutdown::ShutdownSignal;
use crate::transport::{Credentials, build_http_client};

/// Largest part of an error body kept in [`StorageError::Transport`].
pub const MAX_ERROR_BODY: usize = 64 * 1024;

/// Page size of list requests.
const LIST_PAGE_SIZE: u32 = 500;

/// A resource type on the API server.
#[derive(Debug, Clone, Copy)]
pub struct ApiResource<'a> {
    /// `v1` or `group/version`.
    pub api_version: &'a str,
    /// Lowercase plural, e.g. `refreshtokens`.
    pub plural: &'a str,
    /// Whether objects live in a namespace.
    pub namespaced: bool,
}

impl<'a> ApiResource<'a> {
    /// A namespaced resource type.
    #[must_use]
    pub fn namespaced(api_version: &'a str, plural: &'a str) -> Self {
        Self {
            api_version,
            plural,
            namespaced: true,
        }
    }

    /// A cluster-scoped resource type.
    #[must_use]
    pub fn cluster(api_version: &'a str, plural: &'a str) -> Self {
        Self {
            api_version,
            plural,
            namespaced: false,
        }
    }
}

/// Body and status of a completed exchange.
struct Exchange {
    status: StatusCode,
    body: Vec<u8>,
}

/// HTTP access to one namespace of one cluster.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    namespace: String,
    credentials: Credentials,
    shutdown: ShutdownSignal,
}

impl ApiClient {
    /// Creates a client for `connection`.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the HTTP client cannot be built.
    pub fn new(
        connection: ClusterConnection,
        timeout: std::time::Duration,
        shutdown: ShutdownSignal,
    ) -> StorageResult<Self> {
        let http = build_http_client(&connection.tls, timeout)?;
        Ok(Self {
            http,
            base_url: connection.base_url,
            namespace: connection.namespace,
            credentials: connection.credentials,
            shutdown,
        })
    }

    /// Namespace the client operates in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // =========================================================================
    // Verbs
    // =========================================================================

    /// Fetches one object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: ApiResource<'_>,
        name: &str,
    ) -> StorageResult<T> {
        let url = self.resource_url(resource, Some(name))?;
        let body = self
            .call(Method::GET, url, None, resource.plural, name)
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetches every object of a type, following continuation tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if any page cannot be read.
    pub async fn list<T: DeserializeOwned>(&self, resource: ApiResource<'_>) -> StorageResult<Vec<T>> {
        let base = self.resource_url(resource, None)?;
        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &LIST_PAGE_SIZE.to_string());
                if let Some(token) = &continue_token {
                    query.append_pair("continue", token);
                }
            }

            let body = self
                .call(Method::GET, url, None, resource.plural, "")
                .await?;
            let page: ResourceList<T> = serde_json::from_slice(&body)?;
            items.extend(page.items);

            match page.metadata.continue_token.filter(|t| !t.is_empty()) {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }

    /// Checks that the collection of a type can be listed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the type is not served.
    pub async fn probe_collection(&self, resource: ApiResource<'_>) -> StorageResult<()> {
        let mut url = self.resource_url(resource, None)?;
        url.query_pairs_mut().append_pair("limit", "1");
        self.call(Method::GET, url, None, resource.plural, "")
            .await
            .map(drop)
    }

    /// Creates an object.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if an object with the same name exists.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        resource: ApiResource<'_>,
        name: &str,
        object: &B,
    ) -> StorageResult<T> {
        validate_name(name)?;
        let url = self.resource_url(resource, None)?;
        let payload = serde_json::to_vec(object)?;
        let body = self
            .call(Method::POST, url, Some(payload), resource.plural, name)
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Replaces an object. `object` must carry the `resourceVersion` it was
    /// read with.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the object changed since it was read, or
    /// `NotFound` if it was deleted.
    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        resource: ApiResource<'_>,
        name: &str,
        object: &B,
    ) -> StorageResult<T> {
        let url = self.resource_url(resource, Some(name))?;
        let payload = serde_json::to_vec(object)?;
        let body = self
            .call(Method::PUT, url, Some(payload), resource.plural, name)
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn delete(&self, resource: ApiResource<'_>, name: &str) -> StorageResult<()> {
        let url = self.resource_url(resource, Some(name))?;
        self.call(Method::DELETE, url, None, resource.plural, name)
            .await
            .map(drop)
    }

    /// Fetches a non-resource path such as `/version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body does not decode.
    pub async fn get_path<T: DeserializeOwned>(&self, segments: &[&str]) -> StorageResult<T> {
        let url = self.url_from_segments(segments.iter().copied())?;
        let path = segments.join("/");
        let body = self.call(Method::GET, url, None, &path, "").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    /// Builds the URL of a collection (`name == None`) or object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name or namespace is not a legal object
    /// name. No request is sent in that case.
    pub fn resource_url(&self, resource: ApiResource<'_>, name: Option<&str>) -> StorageResult<Url> {
        let prefix = if resource.api_version == "v1" {
            "api"
        } else {
            "apis"
        };

        let mut segments: Vec<&str> = vec![prefix];
        segments.extend(resource.api_version.split('/'));
        if resource.namespaced {
            validate_name(&self.namespace)?;
            segments.push("namespaces");
            segments.push(&self.namespace);
        }
        segments.push(resource.plural);
        if let Some(name) = name {
            validate_name(name)?;
            segments.push(name);
        }

        self.url_from_segments(segments)
    }

    fn url_from_segments<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> StorageResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                StorageError::misconfiguration(format!(
                    "API server URL cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request and returns the body of a successful response.
    async fn call(
        &self,
        method: Method,
        url: Url,
        payload: Option<Vec<u8>>,
        kind: &str,
        name: &str,
    ) -> StorageResult<Vec<u8>> {
        let exchange = self.exchange(method.clone(), url.clone(), payload).await?;
        if exchange.status.is_success() {
            return Ok(exchange.body);
        }
        Err(classify(&method, &url, exchange.status, &exchange.body, kind, name))
    }

    /// Performs one request, racing it against shutdown.
    async fn exchange(
        &self,
        method: Method,
        url: Url,
        payload: Option<Vec<u8>>,
    ) -> StorageResult<Exchange> {
        if self.shutdown.is_triggered() {
            return Err(StorageError::Cancelled);
        }

        tracing::trace!(%method, %url, "Kubernetes API request");

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(ACCEPT, "application/json");
        if let Some(payload) = payload {
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        }
        let request = self.credentials.apply(request).await?;

        let round_trip = async {
            let mut response = request
                .send()
                .await
                .map_err(|e| StorageError::http(format!("{method} {url}: {e}")))?;
            let status = response.status();
            let limit = if status.is_success() {
                usize::MAX
            } else {
                MAX_ERROR_BODY
            };
            let body = drain(&mut response, limit)
                .await
                .map_err(|e| StorageError::http(format!("{method} {url}: reading body: {e}")))?;
            Ok(Exchange { status, body })
        };

        // Dropping the request future aborts the connection.
        tokio::select! {
            biased;
            () = self.shutdown.triggered() => Err(StorageError::Cancelled),
            result = round_trip => result,
        }
    }
}

/// Reads the whole body, keeping at most `limit` bytes.
async fn drain(response: &mut reqwest::Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut kept = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(kept)
}

/// Maps an unsuccessful status onto a storage error.
fn classify(
    method: &Method,
    url: &Url,
    status: StatusCode,
    body: &[u8],
    kind: &str,
    name: &str,
) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::not_found(kind, name),
        StatusCode::CONFLICT if *method == Method::POST => StorageError::already_exists(kind, name),
        StatusCode::CONFLICT if *method == Method::PUT => StorageError::conflict(kind, name),
        _ => {
            let snippet = &body[..body.len().min(MAX_ERROR_BODY)];
            StorageError::transport(
                method.as_str(),
                url.as_str(),
                status.to_string(),
                String::from_utf8_lossy(snippet),
            )
        }
    }
}
