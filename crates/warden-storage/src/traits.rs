//! The storage contract every backend implements.
//!
//! # Update functions
//!
//! Mutations go through an [`Updater`]: the backend reads the current value,
//! hands it to the updater and writes back whatever the updater returns. If
//! the updater returns an error nothing is written and the error is passed
//! through unchanged. Backends may call the updater more than once when a
//! concurrent writer wins the race, so updaters must be pure functions of
//! their input.
//!
//! Identity fields (IDs, emails, the user/connector pair of offline
//! sessions) are immutable: values returned by an updater for those fields
//! are ignored.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageResult;
use crate::gc::GcResult;
use crate::types::{
    AuthCode, AuthRequest, Client, Connector, DeviceRequest, DeviceToken, Keys, OfflineSessions,
    Password, RefreshToken,
};

/// Transform applied by update operations.
pub type Updater<'a, T> = &'a (dyn Fn(T) -> StorageResult<T> + Send + Sync);

/// Persistence interface of the identity provider.
///
/// Implementations must be safe to share between tasks. Operations on
/// different objects are independent; updates of the same object are
/// linearized.
///
/// # Example
///
/// ```ignore
/// use warden_storage::{Storage, StorageError};
///
/// async fn rotate_secret(storage: &dyn Storage, id: &str) -> Result<(), StorageError> {
///     storage
///         .update_client(id, &|mut client| {
///             client.secret = generate_secret();
///             Ok(client)
///         })
///         .await
/// }
/// ```
#[async_trait]
pub trait Storage: Send + Sync {
    // ==================== Lifecycle ====================

    /// Stops background work and cancels outstanding requests.
    ///
    /// # Errors
    ///
    /// Returns an error if background tasks could not be joined.
    async fn close(&self) -> StorageResult<()>;

    // ==================== Auth Requests ====================

    /// Stores a new authorization request.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a request with the same ID exists.
    async fn create_auth_request(&self, request: &AuthRequest) -> StorageResult<()>;

    /// Loads an authorization request. Expired requests are still returned.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such request exists.
    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest>;

    /// Applies `updater` to an authorization request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such request exists, or the updater's error.
    async fn update_auth_request(
        &self,
        id: &str,
        updater: Updater<'_, AuthRequest>,
    ) -> StorageResult<()>;

    /// Deletes an authorization request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such request exists.
    async fn delete_auth_request(&self, id: &str) -> StorageResult<()>;

    // ==================== Auth Codes ====================

    /// Stores a new authorization code.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the code exists.
    async fn create_auth_code(&self, code: &AuthCode) -> StorageResult<()>;

    /// Loads an authorization code. Expired codes are still returned.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such code exists.
    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode>;

    /// Deletes an authorization code.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such code exists.
    async fn delete_auth_code(&self, id: &str) -> StorageResult<()>;

    // ==================== Clients ====================

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a client with the same ID exists.
    async fn create_client(&self, client: &Client) -> StorageResult<()>;

    /// Loads a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such client exists.
    async fn get_client(&self, id: &str) -> StorageResult<Client>;

    /// Applies `updater` to a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such client exists, or the updater's error.
    async fn update_client(&self, id: &str, updater: Updater<'_, Client>) -> StorageResult<()>;

    /// Deletes a client.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such client exists.
    async fn delete_client(&self, id: &str) -> StorageResult<()>;

    /// Lists all clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list_clients(&self) -> StorageResult<Vec<Client>>;

    // ==================== Refresh Tokens ====================

    /// Stores a new refresh token.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a token with the same ID exists.
    async fn create_refresh_token(&self, token: &RefreshToken) -> StorageResult<()>;

    /// Loads a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such token exists.
    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken>;

    /// Applies `updater` to a refresh token.
    ///
    /// At most one update of the same token is in flight across all server
    /// instances; other callers wait for a bounded time.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such token exists, `LockTimeout` if another
    /// rotation held the token for too long, or the updater's error.
    async fn update_refresh_token(
        &self,
        id: &str,
        updater: Updater<'_, RefreshToken>,
    ) -> StorageResult<()>;

    /// Deletes a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such token exists.
    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()>;

    /// Lists all refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list_refresh_tokens(&self) -> StorageResult<Vec<RefreshToken>>;

    // ==================== Passwords ====================

    /// Stores a password credential. The email is matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the email is taken.
    async fn create_password(&self, password: &Password) -> StorageResult<()>;

    /// Loads a password credential by email, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such credential exists.
    async fn get_password(&self, email: &str) -> StorageResult<Password>;

    /// Applies `updater` to a password credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such credential exists, or the updater's error.
    async fn update_password(
        &self,
        email: &str,
        updater: Updater<'_, Password>,
    ) -> StorageResult<()>;

    /// Deletes a password credential.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such credential exists.
    async fn delete_password(&self, email: &str) -> StorageResult<()>;

    /// Lists all password credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list_passwords(&self) -> StorageResult<Vec<Password>>;

    // ==================== Offline Sessions ====================

    /// Stores offline sessions for a user/connector pair.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if sessions for the pair exist.
    async fn create_offline_sessions(&self, sessions: &OfflineSessions) -> StorageResult<()>;

    /// Loads offline sessions for a user/connector pair.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no sessions exist for the pair.
    async fn get_offline_sessions(
        &self,
        user_id: &str,
        conn_id: &str,
    ) -> StorageResult<OfflineSessions>;

    /// Applies `updater` to the offline sessions of a user/connector pair.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no sessions exist for the pair, or the updater's error.
    async fn update_offline_sessions(
        &self,
        user_id: &str,
        conn_id: &str,
        updater: Updater<'_, OfflineSessions>,
    ) -> StorageResult<()>;

    /// Deletes the offline sessions of a user/connector pair.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no sessions exist for the pair.
    async fn delete_offline_sessions(&self, user_id: &str, conn_id: &str) -> StorageResult<()>;

    // ==================== Connectors ====================

    /// Stores a connector.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a connector with the same ID exists.
    async fn create_connector(&self, connector: &Connector) -> StorageResult<()>;

    /// Loads a connector.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such connector exists.
    async fn get_connector(&self, id: &str) -> StorageResult<Connector>;

    /// Applies `updater` to a connector.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such connector exists, or the updater's error.
    async fn update_connector(
        &self,
        id: &str,
        updater: Updater<'_, Connector>,
    ) -> StorageResult<()>;

    /// Deletes a connector.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such connector exists.
    async fn delete_connector(&self, id: &str) -> StorageResult<()>;

    /// Lists all connectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn list_connectors(&self) -> StorageResult<Vec<Connector>>;

    // ==================== Keys ====================

    /// Loads the signing keys.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no keys were created yet.
    async fn get_keys(&self) -> StorageResult<Keys>;

    /// Applies `updater` to the signing keys.
    ///
    /// When no keys exist the updater receives [`Keys::default`] and the
    /// result is created.
    ///
    /// # Errors
    ///
    /// Returns `KeysAlreadyCreated` if another instance created the keys
    /// concurrently, or the updater's error.
    async fn update_keys(&self, updater: Updater<'_, Keys>) -> StorageResult<()>;

    // ==================== Device Flow ====================

    /// Stores a device request.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the user code is taken.
    async fn create_device_request(&self, request: &DeviceRequest) -> StorageResult<()>;

    /// Loads a device request by user code, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such request exists.
    async fn get_device_request(&self, user_code: &str) -> StorageResult<DeviceRequest>;

    /// Stores a device token.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the device code is taken.
    async fn create_device_token(&self, token: &DeviceToken) -> StorageResult<()>;

    /// Loads a device token by device code.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such token exists.
    async fn get_device_token(&self, device_code: &str) -> StorageResult<DeviceToken>;

    /// Applies `updater` to a device token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such token exists, or the updater's error.
    async fn update_device_token(
        &self,
        device_code: &str,
        updater: Updater<'_, DeviceToken>,
    ) -> StorageResult<()>;

    // ==================== Maintenance ====================

    /// Deletes short-lived objects whose expiry is strictly before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the objects cannot be listed. Failures deleting a
    /// single object are logged and skipped.
    async fn garbage_collect(&self, now: OffsetDateTime) -> StorageResult<GcResult>;
}
