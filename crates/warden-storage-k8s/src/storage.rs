//! The Kubernetes backend.
//!
//! [`KubernetesStorage`] maps every [`Storage`] operation onto the custom
//! resource of its entity:
//!
//! - create, get, list and delete are single requests
//! - updates read the object, apply the updater and write it back with the
//!   `resourceVersion` that was read, retrying the cycle on conflicts
//! - refresh token updates additionally hold the annotation lock from
//!   [`crate::lock`]

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde::de::IgnoredAny;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use warden_storage::{
    AuthCode, AuthRequest, Client, Clock, Connector, DeviceRequest, DeviceToken, GcResult, Keys,
    OfflineSessions, Password, RefreshToken, Storage, StorageError, StorageResult, Updater,
};

use crate::bootstrap::ClusterConnection;
use crate::client::{ApiClient, ApiResource};
use crate::config::KubernetesConfig;
use crate::gc;
use crate::lock::RefreshTokenLock;
use crate::naming::{id_to_name, offline_token_name, validate_name};
use crate::resources::{
    Entity, KEYS_NAME, Resource, device_request_name, device_token_name, from_resource,
    new_resource, password_name, replace_body,
};
use crate::retry::retry_on_conflict;
use crate::schema::{RESOURCE_VERSION, SchemaProvisioner, detect_crd_api};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};

pub(crate) struct StorageInner {
    client: ApiClient,
    api_version: String,
    config: KubernetesConfig,
    shutdown: ShutdownSignal,
    trigger: ShutdownTrigger,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Storage backed by Kubernetes custom resources.
///
/// Cheap to clone; clones share the connection pool and background tasks.
#[derive(Clone)]
pub struct KubernetesStorage {
    inner: Arc<StorageInner>,
}

impl std::fmt::Debug for KubernetesStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesStorage")
            .field("namespace", &self.inner.client.namespace())
            .field("api_version", &self.inner.api_version)
            .finish_non_exhaustive()
    }
}

impl KubernetesStorage {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Connects using the bootstrap source named in `config` and registers
    /// the custom resource definitions.
    ///
    /// # Errors
    ///
    /// Returns `Misconfiguration` if the configuration or bootstrap source is
    /// invalid, or `SchemaProvisioning` if `wait_for_resources` is set and
    /// the definitions could not be registered.
    pub async fn open(config: KubernetesConfig) -> StorageResult<Self> {
        let connection = ClusterConnection::from_config(&config).await?;
        Self::open_with_connection(config, connection).await
    }

    /// Like [`open`](Self::open), but with an explicit connection. The
    /// bootstrap fields of `config` are ignored.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn open_with_connection(
        config: KubernetesConfig,
        connection: ClusterConnection,
    ) -> StorageResult<Self> {
        config.validate_tuning()?;

        let (trigger, shutdown) = shutdown::channel();
        let client = ApiClient::new(connection, config.request_timeout, shutdown.clone())?;
        let api_version = format!("{}/{RESOURCE_VERSION}", config.api_group);

        let crd_api = detect_crd_api(&client).await;
        let provisioner = SchemaProvisioner::new(client.clone(), &config.api_group, crd_api);

        let mut tasks = Vec::new();
        if config.wait_for_resources {
            if !provisioner.register_all().await {
                return Err(StorageError::schema_provisioning(
                    "failed to register custom resource definitions",
                ));
            }
            provisioner
                .wait_established(config.schema_ready_timeout, &shutdown)
                .await?;
        } else if !provisioner.register_all().await {
            warn!(
                retry_in_secs = config.schema_retry_interval.as_secs(),
                "Custom resource definitions not registered, retrying in background"
            );
            tasks.push(tokio::spawn(
                provisioner.retry_in_background(config.schema_retry_interval, shutdown.clone()),
            ));
        }

        info!(
            namespace = client.namespace(),
            api_version = %api_version,
            "Kubernetes storage opened"
        );

        Ok(Self {
            inner: Arc::new(StorageInner {
                client,
                api_version,
                config,
                shutdown,
                trigger,
                tasks: Mutex::new(tasks),
            }),
        })
    }

    pub(crate) fn from_weak(inner: &Weak<StorageInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Starts periodic garbage collection every `gc_interval`, using `clock`
    /// for the current time. The task stops on [`Storage::close`].
    pub fn start_garbage_collection(&self, clock: Arc<dyn Clock>) {
        let handle = gc::spawn_runner(
            &self.inner,
            clock,
            self.inner.config.gc_interval,
            self.inner.shutdown.clone(),
        );
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Namespace the objects are stored in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.inner.client.namespace()
    }

    pub(crate) fn config(&self) -> &KubernetesConfig {
        &self.inner.config
    }

    pub(crate) fn shutdown(&self) -> &ShutdownSignal {
        &self.inner.shutdown
    }

    // =========================================================================
    // Generic entity access
    // =========================================================================

    fn api<E: Entity>(&self) -> ApiResource<'_> {
        ApiResource::namespaced(&self.inner.api_version, E::KIND.plural)
    }

    async fn create_entity<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        let resource = new_resource(&self.inner.api_version, self.namespace(), entity);
        self.inner
            .client
            .post::<_, IgnoredAny>(self.api::<E>(), &resource.metadata.name, &resource)
            .await?;
        Ok(())
    }

    /// No object can exist under an illegal name, so lookups of one report
    /// `NotFound` without a request.
    fn ensure_lookup_name<E: Entity>(name: &str) -> StorageResult<()> {
        validate_name(name).map_err(|_| StorageError::not_found(E::KIND.plural, name))
    }

    pub(crate) async fn get_resource<E: Entity>(
        &self,
        name: &str,
    ) -> StorageResult<Resource<E::Body>> {
        Self::ensure_lookup_name::<E>(name)?;
        self.inner.client.get(self.api::<E>(), name).await
    }

    async fn get_entity<E: Entity>(&self, name: &str) -> StorageResult<E> {
        Ok(from_resource(self.get_resource::<E>(name).await?))
    }

    pub(crate) async fn put_resource<E: Entity>(
        &self,
        name: &str,
        resource: &Resource<E::Body>,
    ) -> StorageResult<()> {
        self.inner
            .client
            .put::<_, IgnoredAny>(self.api::<E>(), name, resource)
            .await?;
        Ok(())
    }

    pub(crate) async fn list_resources<E: Entity>(&self) -> StorageResult<Vec<Resource<E::Body>>> {
        self.inner.client.list(self.api::<E>()).await
    }

    async fn list_entities<E: Entity>(&self) -> StorageResult<Vec<E>> {
        Ok(self
            .list_resources::<E>()
            .await?
            .into_iter()
            .map(from_resource)
            .collect())
    }

    pub(crate) async fn delete_resource<E: Entity>(&self, name: &str) -> StorageResult<()> {
        Self::ensure_lookup_name::<E>(name)?;
        self.inner.client.delete(self.api::<E>(), name).await
    }

    /// Read-modify-write of one object, retried on conflicts.
    async fn update_entity<E: Entity>(
        &self,
        name: &str,
        updater: Updater<'_, E>,
    ) -> StorageResult<()> {
        retry_on_conflict(
            self.inner.config.conflict_retry_budget,
            &self.inner.shutdown,
            E::KIND.plural,
            name,
            || async move {
                let previous = self.get_resource::<E>(name).await?;
                let current = E::from_body(&previous.metadata.name, previous.body.clone());

                let mut updated = updater(current.clone())?;
                updated.keep_identity(&current);

                self.put_resource::<E>(name, &replace_body(previous, &updated))
                    .await
            },
        )
        .await
    }
}

#[async_trait]
impl Storage for KubernetesStorage {
    // ==================== Lifecycle ====================

    async fn close(&self) -> StorageResult<()> {
        self.inner.trigger.trigger();

        let handles: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut panicked = 0;
        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                panicked += 1;
            }
        }

        info!("Kubernetes storage closed");
        if panicked > 0 {
            return Err(StorageError::internal(format!(
                "{panicked} background task(s) panicked"
            )));
        }
        Ok(())
    }

    // ==================== Auth Requests ====================

    #[instrument(skip_all, fields(id = %request.id))]
    async fn create_auth_request(&self, request: &AuthRequest) -> StorageResult<()> {
        self.create_entity(request).await
    }

    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest> {
        self.get_entity(id).await
    }

    #[instrument(skip(self, updater))]
    async fn update_auth_request(
        &self,
        id: &str,
        updater: Updater<'_, AuthRequest>,
    ) -> StorageResult<()> {
        self.update_entity(id, updater).await
    }

    async fn delete_auth_request(&self, id: &str) -> StorageResult<()> {
        self.delete_resource::<AuthRequest>(id).await
    }

    // ==================== Auth Codes ====================

    #[instrument(skip_all, fields(id = %code.id))]
    async fn create_auth_code(&self, code: &AuthCode) -> StorageResult<()> {
        self.create_entity(code).await
    }

    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode> {
        self.get_entity(id).await
    }

    async fn delete_auth_code(&self, id: &str) -> StorageResult<()> {
        self.delete_resource::<AuthCode>(id).await
    }

    // ==================== Clients ====================

    #[instrument(skip_all, fields(id = %client.id))]
    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        self.create_entity(client).await
    }

    async fn get_client(&self, id: &str) -> StorageResult<Client> {
        self.get_entity(&id_to_name(id)).await
    }

    #[instrument(skip(self, updater))]
    async fn update_client(&self, id: &str, updater: Updater<'_, Client>) -> StorageResult<()> {
        self.update_entity(&id_to_name(id), updater).await
    }

    async fn delete_client(&self, id: &str) -> StorageResult<()> {
        self.delete_resource::<Client>(&id_to_name(id)).await
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        self.list_entities().await
    }

    // ==================== Refresh Tokens ====================

    #[instrument(skip_all, fields(id = %token.id))]
    async fn create_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        self.create_entity(token).await
    }

    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken> {
        self.get_entity(id).await
    }

    #[instrument(skip(self, updater))]
    async fn update_refresh_token(
        &self,
        id: &str,
        updater: Updater<'_, RefreshToken>,
    ) -> StorageResult<()> {
        let mut lock = RefreshTokenLock::new(self, id);
        lock.acquire().await?;

        let result = self.update_entity(id, updater).await;
        if let Err(e) = &result {
            debug!(error = %e, "Refresh token update failed");
        }

        lock.release().await;
        result
    }

    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()> {
        self.delete_resource::<RefreshToken>(id).await
    }

    async fn list_refresh_tokens(&self) -> StorageResult<Vec<RefreshToken>> {
        self.list_entities().await
    }

    // ==================== Passwords ====================

    async fn create_password(&self, password: &Password) -> StorageResult<()> {
        self.create_entity(password).await
    }

    async fn get_password(&self, email: &str) -> StorageResult<Password> {
        self.get_entity(&password_name(email)).await
    }

    #[instrument(skip(self, updater))]
    async fn update_password(
        &self,
        email: &str,
        updater: Updater<'_, Password>,
    ) -> StorageResult<()> {
        self.update_entity(&password_name(email), updater).await
    }

    async fn delete_password(&self, email: &str) -> StorageResult<()> {
        self.delete_resource::<Password>(&password_name(email)).await
    }

    async fn list_passwords(&self) -> StorageResult<Vec<Password>> {
        self.list_entities().await
    }

    // ==================== Offline Sessions ====================

    #[instrument(skip_all, fields(user_id = %sessions.user_id, conn_id = %sessions.conn_id))]
    async fn create_offline_sessions(&self, sessions: &OfflineSessions) -> StorageResult<()> {
        self.create_entity(sessions).await
    }

    async fn get_offline_sessions(
        &self,
        user_id: &str,
        conn_id: &str,
    ) -> StorageResult<OfflineSessions> {
        self.get_entity(&offline_token_name(user_id, conn_id)).await
    }

    #[instrument(skip(self, updater))]
    async fn update_offline_sessions(
        &self,
        user_id: &str,
        conn_id: &str,
        updater: Updater<'_, OfflineSessions>,
    ) -> StorageResult<()> {
        self.update_entity(&offline_token_name(user_id, conn_id), updater)
            .await
    }

    async fn delete_offline_sessions(&self, user_id: &str, conn_id: &str) -> StorageResult<()> {
        self.delete_resource::<OfflineSessions>(&offline_token_name(user_id, conn_id))
            .await
    }

    // ==================== Connectors ====================

    #[instrument(skip_all, fields(id = %connector.id))]
    async fn create_connector(&self, connector: &Connector) -> StorageResult<()> {
        self.create_entity(connector).await
    }

    async fn get_connector(&self, id: &str) -> StorageResult<Connector> {
        self.get_entity(id).await
    }

    #[instrument(skip(self, updater))]
    async fn update_connector(
        &self,
        id: &str,
        updater: Updater<'_, Connector>,
    ) -> StorageResult<()> {
        self.update_entity(id, updater).await
    }

    async fn delete_connector(&self, id: &str) -> StorageResult<()> {
        self.delete_resource::<Connector>(id).await
    }

    async fn list_connectors(&self) -> StorageResult<Vec<Connector>> {
        self.list_entities().await
    }

    // ==================== Keys ====================

    async fn get_keys(&self) -> StorageResult<Keys> {
        self.get_entity(KEYS_NAME).await
    }

    #[instrument(skip_all)]
    async fn update_keys(&self, updater: Updater<'_, Keys>) -> StorageResult<()> {
        match self.get_resource::<Keys>(KEYS_NAME).await {
            Ok(_) => self.update_entity(KEYS_NAME, updater).await,
            Err(e) if e.is_not_found() => {
                let keys = updater(Keys::default())?;
                match self.create_entity(&keys).await {
                    Ok(()) => {
                        info!("Created signing keys");
                        Ok(())
                    }
                    Err(e) if e.is_already_exists() => Err(StorageError::KeysAlreadyCreated),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    // ==================== Device Flow ====================

    #[instrument(skip_all, fields(device_code = %request.device_code))]
    async fn create_device_request(&self, request: &DeviceRequest) -> StorageResult<()> {
        self.create_entity(request).await
    }

    async fn get_device_request(&self, user_code: &str) -> StorageResult<DeviceRequest> {
        self.get_entity(&device_request_name(user_code)).await
    }

    #[instrument(skip_all, fields(device_code = %token.device_code))]
    async fn create_device_token(&self, token: &DeviceToken) -> StorageResult<()> {
        self.create_entity(token).await
    }

    async fn get_device_token(&self, device_code: &str) -> StorageResult<DeviceToken> {
        self.get_entity(&device_token_name(device_code)).await
    }

    #[instrument(skip(self, updater))]
    async fn update_device_token(
        &self,
        device_code: &str,
        updater: Updater<'_, DeviceToken>,
    ) -> StorageResult<()> {
        self.update_entity(&device_token_name(device_code), updater).await
    }

    // ==================== Maintenance ====================

    #[instrument(skip(self))]
    async fn garbage_collect(&self, now: OffsetDateTime) -> StorageResult<GcResult> {
        gc::collect(self, now).await
    }
}
