//! # warden-storage-k8s
//!
//! Kubernetes backend for [`warden_storage`]. Every entity is stored as a
//! namespaced custom resource; the API server's optimistic concurrency
//! (`resourceVersion`) provides the update guarantees of the storage
//! contract.
//!
//! ## Modules
//!
//! - [`config`] - backend configuration
//! - [`bootstrap`] - reaching the API server (kubeconfig or in-cluster)
//! - [`transport`] - HTTP client, TLS and credentials
//! - [`client`] - typed REST calls and status mapping
//! - [`resources`] - wire format of the custom resources
//! - [`naming`] - mapping identifiers to legal object names
//! - [`schema`] - custom resource definition registration
//! - [`retry`] - conflict retry loop
//! - [`lock`] - refresh token lock
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_storage::{Storage, SystemClock};
//! use warden_storage_k8s::{KubernetesConfig, KubernetesStorage};
//!
//! let config = KubernetesConfig::in_cluster().with_wait_for_resources(true);
//! let storage = KubernetesStorage::open(config).await?;
//! storage.start_garbage_collection(Arc::new(SystemClock));
//!
//! let clients = storage.list_clients().await?;
//! storage.close().await?;
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
mod gc;
mod kubeconfig;
pub mod lock;
pub mod naming;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod shutdown;
mod storage;
pub mod transport;

pub use bootstrap::{ClusterConnection, InClusterEnvironment};
pub use client::{ApiClient, ApiResource};
pub use config::{DEFAULT_API_GROUP, KubernetesConfig, LockConfig};
pub use lock::LOCK_ANNOTATION;
pub use naming::{MAX_NAME_LEN, id_to_name, offline_token_name, validate_name};
pub use retry::retry_on_conflict;
pub use schema::CrdApi;
pub use storage::KubernetesStorage;
pub use transport::{Credentials, ServiceAccountToken, TlsMaterial};
