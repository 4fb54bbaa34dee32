//! Cross-process lock on refresh tokens.
//!
//! Rotating a refresh token must not run twice concurrently, even on
//! different server instances. The lock is a lease written into an
//! annotation of the token object: its value is the RFC 3339 time at which
//! the lease expires. Writing it goes through the normal optimistic
//! concurrency check, so exactly one contender wins.
//!
//! Leases that outlive their deadline are broken by the next contender. A
//! holder that stalls past its lease can therefore still finish its write
//! after someone else acquired the lock; the lock is not fenced.

use time::format_description::well_known::Rfc3339;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use warden_storage::{RefreshToken, StorageError, StorageResult};

use crate::config::LockConfig;
use crate::resources::REFRESH_TOKEN;
use crate::retry::retry_on_conflict;
use crate::storage::KubernetesStorage;

/// Annotation holding the lease deadline.
pub const LOCK_ANNOTATION: &str = "warden.dev/resource-lock";

/// Where this caller stands with respect to the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockState {
    Unlocked,
    LockedByMe,
    WaitingOnOther,
}

/// Interpretation of a lock annotation at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaseStatus {
    /// No lease.
    Free,
    /// Lease held and not yet expired.
    Held,
    /// Lease past its deadline.
    Expired,
}

/// Classifies the annotation value `value` at `now`.
///
/// # Errors
///
/// Returns `Internal` if the value is not an RFC 3339 timestamp.
pub(crate) fn lease_status(value: Option<&str>, now: OffsetDateTime) -> StorageResult<LeaseStatus> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(LeaseStatus::Free);
    };
    let deadline = OffsetDateTime::parse(value, &Rfc3339).map_err(|e| {
        StorageError::internal(format!("malformed lock annotation '{value}': {e}"))
    })?;
    Ok(if now < deadline {
        LeaseStatus::Held
    } else {
        LeaseStatus::Expired
    })
}

fn lease_value(now: OffsetDateTime, config: &LockConfig) -> StorageResult<String> {
    let timeout = TimeDuration::try_from(config.timeout)
        .map_err(|e| StorageError::internal(format!("lock timeout out of range: {e}")))?;
    (now + timeout)
        .format(&Rfc3339)
        .map_err(|e| StorageError::internal(format!("failed to format lock lease: {e}")))
}

/// Lock on one refresh token.
pub(crate) struct RefreshTokenLock<'a> {
    storage: &'a KubernetesStorage,
    id: &'a str,
    state: LockState,
    lease: Option<String>,
}

impl<'a> RefreshTokenLock<'a> {
    pub(crate) fn new(storage: &'a KubernetesStorage, id: &'a str) -> Self {
        Self {
            storage,
            id,
            state: LockState::Unlocked,
            lease: None,
        }
    }

    /// Acquires the lock, polling while another holder's lease is live.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` after `check_attempts` unsuccessful checks,
    /// `NotFound` if the token does not exist, or `Internal` for a malformed
    /// annotation.
    pub(crate) async fn acquire(&mut self) -> StorageResult<()> {
        let storage = self.storage;
        let config = &storage.config().lock;

        for attempt in 1..=config.check_attempts {
            let mut resource = storage.get_resource::<RefreshToken>(self.id).await?;
            let now = OffsetDateTime::now_utc();
            let current = resource.metadata.annotations.get(LOCK_ANNOTATION);

            match lease_status(current.map(String::as_str), now)? {
                LeaseStatus::Held => {
                    self.state = LockState::WaitingOnOther;
                    debug!(id = self.id, attempt, "Refresh token locked by another caller");
                }
                status => {
                    if status == LeaseStatus::Expired {
                        debug!(
                            id = self.id,
                            lease = current.map_or("", String::as_str),
                            "Breaking expired refresh token lock"
                        );
                    }
                    let lease = lease_value(now, config)?;
                    resource
                        .metadata
                        .annotations
                        .insert(LOCK_ANNOTATION.to_string(), lease.clone());

                    match storage.put_resource::<RefreshToken>(self.id, &resource).await {
                        Ok(()) => {
                            self.state = LockState::LockedByMe;
                            self.lease = Some(lease);
                            debug!(id = self.id, attempt, "Refresh token lock acquired");
                            return Ok(());
                        }
                        Err(e) if e.is_conflict() => {
                            self.state = LockState::WaitingOnOther;
                            debug!(id = self.id, attempt, "Lost refresh token lock race");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if !storage.shutdown().sleep(config.check_period).await {
                return Err(StorageError::Cancelled);
            }
        }

        Err(StorageError::lock_timeout(self.id))
    }

    /// Removes the lease if this caller holds it. Failures are logged.
    pub(crate) async fn release(mut self) {
        if self.state != LockState::LockedByMe {
            return;
        }
        let Some(lease) = self.lease.take() else {
            return;
        };

        let storage = self.storage;
        let id = self.id;
        let lease = lease.as_str();
        let result = retry_on_conflict(
            storage.config().conflict_retry_budget,
            storage.shutdown(),
            REFRESH_TOKEN.plural,
            id,
            || async move {
                let mut resource = storage.get_resource::<RefreshToken>(id).await?;
                // Only remove the lease we wrote; anything else belongs to
                // whoever broke it.
                if resource.metadata.annotations.get(LOCK_ANNOTATION).map(String::as_str)
                    != Some(lease)
                {
                    return Ok(());
                }
                resource.metadata.annotations.remove(LOCK_ANNOTATION);
                storage.put_resource::<RefreshToken>(id, &resource).await
            },
        )
        .await;

        match result {
            Ok(()) => debug!(id, "Refresh token lock released"),
            Err(e) => debug!(id, error = %e, "Failed to release refresh token lock"),
        }
    }
}
