//! Backend configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [storage.kubernetes]
//! in_cluster = true
//! api_group = "warden.dev"
//! request_timeout = "15s"
//! wait_for_resources = true
//!
//! [storage.kubernetes.lock]
//! timeout = "10s"
//! check_period = "100ms"
//! check_attempts = 60
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_storage::{StorageError, StorageResult};

use crate::naming::validate_name;

/// Default API group of the custom resources.
pub const DEFAULT_API_GROUP: &str = "warden.dev";

/// Kubernetes storage configuration.
///
/// Exactly one of `in_cluster` and `kubeconfig_file` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// Bootstrap from the pod's service account.
    pub in_cluster: bool,

    /// Bootstrap from a kubeconfig file.
    pub kubeconfig_file: Option<PathBuf>,

    /// API group the custom resources are registered under.
    pub api_group: String,

    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Block `open` until all custom resource definitions are registered
    /// and established. When disabled, registration failures are retried in
    /// the background.
    pub wait_for_resources: bool,

    /// How long `open` waits for definitions to become established.
    #[serde(with = "humantime_serde")]
    pub schema_ready_timeout: Duration,

    /// Delay between background registration attempts.
    #[serde(with = "humantime_serde")]
    pub schema_retry_interval: Duration,

    /// How long update paths keep retrying after write conflicts.
    #[serde(with = "humantime_serde")]
    pub conflict_retry_budget: Duration,

    /// Interval of the background garbage collector.
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,

    /// Refresh token lock settings.
    pub lock: LockConfig,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            in_cluster: false,
            kubeconfig_file: None,
            api_group: DEFAULT_API_GROUP.to_string(),
            request_timeout: Duration::from_secs(15),
            wait_for_resources: false,
            schema_ready_timeout: Duration::from_secs(30),
            schema_retry_interval: Duration::from_secs(30),
            conflict_retry_budget: Duration::from_secs(2),
            gc_interval: Duration::from_secs(300), // 5 minutes
            lock: LockConfig::default(),
        }
    }
}

impl KubernetesConfig {
    /// Creates a configuration that bootstraps from the pod environment.
    #[must_use]
    pub fn in_cluster() -> Self {
        Self {
            in_cluster: true,
            ..Self::default()
        }
    }

    /// Creates a configuration that bootstraps from a kubeconfig file.
    #[must_use]
    pub fn from_kubeconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the document does not parse.
    pub fn from_toml_str(source: &str) -> StorageResult<Self> {
        toml::from_str(source).map_err(|e| {
            StorageError::misconfiguration(format!("invalid kubernetes storage config: {e}"))
        })
    }

    /// Sets the API group.
    #[must_use]
    pub fn with_api_group(mut self, group: impl Into<String>) -> Self {
        self.api_group = group.into();
        self
    }

    /// Sets whether `open` waits for the custom resource definitions.
    #[must_use]
    pub fn with_wait_for_resources(mut self, wait: bool) -> Self {
        self.wait_for_resources = wait;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the conflict retry budget.
    #[must_use]
    pub fn with_conflict_retry_budget(mut self, budget: Duration) -> Self {
        self.conflict_retry_budget = budget;
        self
    }

    /// Sets the readiness timeout of custom resource definitions.
    #[must_use]
    pub fn with_schema_ready_timeout(mut self, timeout: Duration) -> Self {
        self.schema_ready_timeout = timeout;
        self
    }

    /// Sets the background registration retry interval.
    #[must_use]
    pub fn with_schema_retry_interval(mut self, interval: Duration) -> Self {
        self.schema_retry_interval = interval;
        self
    }

    /// Sets the garbage collection interval.
    #[must_use]
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the refresh token lock settings.
    #[must_use]
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Checks the bootstrap options.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if both or neither bootstrap source is
    /// set, or if a value is out of range.
    pub fn validate(&self) -> StorageResult<()> {
        match (self.in_cluster, &self.kubeconfig_file) {
            (true, Some(_)) => {
                return Err(StorageError::misconfiguration(
                    "cannot specify both 'in_cluster' and 'kubeconfig_file'",
                ));
            }
            (false, None) => {
                return Err(StorageError::misconfiguration(
                    "must specify either 'in_cluster' or 'kubeconfig_file'",
                ));
            }
            _ => {}
        }

        self.validate_tuning()
    }

    /// Checks everything except the bootstrap source.
    pub(crate) fn validate_tuning(&self) -> StorageResult<()> {
        validate_name(&self.api_group).map_err(|e| {
            StorageError::misconfiguration(format!("invalid api_group: {e}"))
        })?;
        if !self.api_group.contains('.') {
            return Err(StorageError::misconfiguration(
                "api_group must be a domain name containing at least one '.'",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(StorageError::misconfiguration(
                "request_timeout must be greater than zero",
            ));
        }
        self.lock.validate()
    }
}

/// Refresh token lock settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length written into the lock annotation.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Delay between checks while another instance holds the lock.
    #[serde(with = "humantime_serde")]
    pub check_period: Duration,

    /// Number of checks before giving up with a lock timeout.
    pub check_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            check_period: Duration::from_millis(100),
            check_attempts: 60,
        }
    }
}

impl LockConfig {
    fn validate(&self) -> StorageResult<()> {
        if self.timeout.is_zero() {
            return Err(StorageError::misconfiguration(
                "lock.timeout must be greater than zero",
            ));
        }
        if self.check_attempts == 0 {
            return Err(StorageError::misconfiguration(
                "lock.check_attempts must be greater than zero",
            ));
        }
        Ok(())
    }
}
