//! Storage contract for the Warden identity provider.
//!
//! This crate defines what a storage backend must do, independent of where
//! the data lives:
//!
//! - [`types`] - the persisted domain entities (auth requests and codes,
//!   clients, refresh tokens, passwords, offline sessions, connectors,
//!   signing keys, device flow state)
//! - [`Storage`] - the backend trait
//! - [`StorageError`] - the error kinds backends report
//! - [`GcResult`] and [`Clock`] - garbage collection support
//!
//! # Implementations
//!
//! - `warden-storage-k8s` - Kubernetes custom resources

pub mod error;
pub mod gc;
pub mod traits;
pub mod types;

pub use error::{ErrorCategory, StorageError, StorageResult};
pub use gc::{Clock, FixedClock, GcResult, SystemClock};
pub use traits::{Storage, Updater};
pub use types::{
    AuthCode, AuthRequest, Claims, Client, Connector, DeviceRequest, DeviceToken, JsonWebKey,
    Keys, OfflineSessions, Password, PkceChallenge, RefreshToken, RefreshTokenRef,
    VerificationKey,
};
