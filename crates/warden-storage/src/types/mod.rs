//! Domain types persisted by storage backends.

pub mod auth;
pub mod client;
pub mod connector;
pub mod device;
pub mod keys;
pub mod password;
pub mod refresh_token;

pub use auth::{AuthCode, AuthRequest, Claims, PkceChallenge};
pub use client::Client;
pub use connector::Connector;
pub use device::{DeviceRequest, DeviceToken};
pub use keys::{JsonWebKey, Keys, VerificationKey};
pub use password::Password;
pub use refresh_token::{OfflineSessions, RefreshToken, RefreshTokenRef};
