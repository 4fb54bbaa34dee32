//! Registration of the custom resource definitions.
//!
//! Clusters older than 1.16 only serve `apiextensions.k8s.io/v1beta1`, whose
//! definitions carry a single `version` string. Newer clusters get the `v1`
//! shape with a `versions` list and a structural schema that preserves
//! unknown fields. The shape is chosen once from `GET /version`.

use std::time::Duration;

use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warden_storage::{StorageError, StorageResult};

use crate::client::{ApiClient, ApiResource};
use crate::resources::{ALL_KINDS, ResourceKind};
use crate::shutdown::ShutdownSignal;

const CRD_PLURAL: &str = "customresourcedefinitions";

/// Version of the custom resources themselves.
pub const RESOURCE_VERSION: &str = "v1";

/// Interval between readiness checks.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Generation of the custom resource definition API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdApi {
    /// `apiextensions.k8s.io/v1beta1`, clusters before 1.16.
    Legacy,
    /// `apiextensions.k8s.io/v1`.
    Current,
}

impl CrdApi {
    /// API version of the definition objects.
    #[must_use]
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Legacy => "apiextensions.k8s.io/v1beta1",
            Self::Current => "apiextensions.k8s.io/v1",
        }
    }

    /// Picks the generation for a cluster `gitVersion` such as `v1.15.3-gke.1`.
    /// Unparseable versions get the current generation.
    #[must_use]
    pub fn for_server_version(git_version: &str) -> Self {
        match parse_version(git_version) {
            Some(version) if version < (1, 16, 0) => Self::Legacy,
            _ => Self::Current,
        }
    }

    /// Builds the definition of `kind` in `group`.
    #[must_use]
    pub fn definition(self, group: &str, kind: ResourceKind) -> Value {
        let mut spec = json!({
            "group": group,
            "names": {
                "kind": kind.kind,
                "listKind": kind.list_kind(),
                "plural": kind.plural,
                "singular": kind.singular,
            },
            "scope": "Namespaced",
        });

        match self {
            Self::Legacy => {
                spec["version"] = json!(RESOURCE_VERSION);
            }
            Self::Current => {
                spec["versions"] = json!([{
                    "name": RESOURCE_VERSION,
                    "served": true,
                    "storage": true,
                    "schema": {
                        "openAPIV3Schema": {
                            "type": "object",
                            "x-kubernetes-preserve-unknown-fields": true,
                        }
                    }
                }]);
            }
        }

        json!({
            "apiVersion": self.api_version(),
            "kind": "CustomResourceDefinition",
            "metadata": { "name": kind.crd_name(group) },
            "spec": spec,
        })
    }
}

/// Parses `major.minor.patch` out of a git version, ignoring a leading `v`
/// and any pre-release or build suffix.
fn parse_version(git_version: &str) -> Option<(u64, u64, u64)> {
    let trimmed = git_version.trim().trim_start_matches('v');
    let core = trimmed
        .split(['-', '+'])
        .next()
        .filter(|core| !core.is_empty())?;

    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerVersion {
    git_version: String,
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionStatus {
    #[serde(default)]
    status: Option<Conditions>,
}

#[derive(Debug, Default, Deserialize)]
struct Conditions {
    #[serde(default)]
    conditions: Option<Vec<Condition>>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

impl DefinitionStatus {
    fn is_established(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.condition_type == "Established" && c.status == "True")
            })
    }
}

/// Detects which definition API the cluster serves.
pub(crate) async fn detect_crd_api(client: &ApiClient) -> CrdApi {
    match client.get_path::<ServerVersion>(&["version"]).await {
        Ok(version) => {
            let api = CrdApi::for_server_version(&version.git_version);
            info!(
                server_version = %version.git_version,
                crd_api = api.api_version(),
                "Detected Kubernetes version"
            );
            api
        }
        Err(e) => {
            warn!(error = %e, "Failed to detect Kubernetes version, assuming 1.16 or newer");
            CrdApi::Current
        }
    }
}

/// Registers the definitions of every entity kind.
#[derive(Debug, Clone)]
pub(crate) struct SchemaProvisioner {
    client: ApiClient,
    group: String,
    resource_api_version: String,
    crd_api: CrdApi,
}

impl SchemaProvisioner {
    pub(crate) fn new(client: ApiClient, group: &str, crd_api: CrdApi) -> Self {
        Self {
            client,
            group: group.to_string(),
            resource_api_version: format!("{group}/{RESOURCE_VERSION}"),
            crd_api,
        }
    }

    fn crd_resource(&self) -> ApiResource<'_> {
        ApiResource::cluster(self.crd_api.api_version(), CRD_PLURAL)
    }

    /// Registers every definition that is not served yet.
    ///
    /// Returns `true` if all kinds are registered. Failures are logged.
    pub(crate) async fn register_all(&self) -> bool {
        let mut ok = true;
        for kind in ALL_KINDS {
            if let Err(e) = self.register(kind).await {
                if e.is_cancelled() {
                    return false;
                }
                if e.is_not_found() {
                    error!(
                        crd = %kind.crd_name(&self.group),
                        api = self.crd_api.api_version(),
                        "Custom resource definition API not available, enable the {} API group",
                        self.crd_api.api_version()
                    );
                } else {
                    error!(
                        crd = %kind.crd_name(&self.group),
                        error = %e,
                        "Failed to register custom resource definition"
                    );
                }
                ok = false;
            }
        }
        ok
    }

    async fn register(&self, kind: ResourceKind) -> StorageResult<()> {
        let crd_name = kind.crd_name(&self.group);
        let served = ApiResource::namespaced(&self.resource_api_version, kind.plural);
        match self.client.probe_collection(served).await {
            Ok(()) => {
                debug!(crd = %crd_name, "Custom resource already served");
                return Ok(());
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => debug!(crd = %crd_name, error = %e, "Custom resource not listable"),
        }

        let definition = self.crd_api.definition(&self.group, kind);
        match self
            .client
            .post::<_, IgnoredAny>(self.crd_resource(), &crd_name, &definition)
            .await
        {
            Ok(_) => {
                info!(crd = %crd_name, "Created custom resource definition");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(crd = %crd_name, "Custom resource definition already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Waits until every definition reports `Established=True`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaProvisioning` if `timeout` passes first, or `Cancelled`
    /// on shutdown.
    pub(crate) async fn wait_established(
        &self,
        timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> StorageResult<()> {
        let deadline = Instant::now() + timeout;

        for kind in ALL_KINDS {
            let crd_name = kind.crd_name(&self.group);
            loop {
                match self
                    .client
                    .get::<DefinitionStatus>(self.crd_resource(), &crd_name)
                    .await
                {
                    Ok(status) if status.is_established() => break,
                    Ok(_) => debug!(crd = %crd_name, "Waiting for custom resource definition"),
                    Err(e) if e.is_not_found() => {
                        debug!(crd = %crd_name, "Custom resource definition not visible yet");
                    }
                    Err(e) => return Err(e),
                }

                if Instant::now() >= deadline {
                    return Err(StorageError::schema_provisioning(format!(
                        "custom resource definition {crd_name} not established after {timeout:?}"
                    )));
                }
                if !shutdown.sleep(READY_POLL_INTERVAL).await {
                    return Err(StorageError::Cancelled);
                }
            }
        }

        info!(count = ALL_KINDS.len(), "Custom resource definitions established");
        Ok(())
    }

    /// Keeps calling [`register_all`](Self::register_all) every `interval`
    /// until it succeeds or shutdown is signalled.
    pub(crate) async fn retry_in_background(self, interval: Duration, shutdown: ShutdownSignal) {
        loop {
            if !shutdown.sleep(interval).await {
                debug!("Schema registration retry stopped");
                return;
            }
            if self.register_all().await {
                info!("Custom resource definitions registered");
                return;
            }
            warn!(
                retry_in_secs = interval.as_secs(),
                "Custom resource definitions still missing"
            );
        }
    }
}
