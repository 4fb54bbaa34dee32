//! Garbage collection of expired short-lived objects.

use std::sync::{Arc, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_storage::{
    AuthCode, AuthRequest, Clock, DeviceRequest, DeviceToken, GcResult, StorageResult,
};

use crate::resources::{Expiring, from_resource};
use crate::shutdown::ShutdownSignal;
use crate::storage::{KubernetesStorage, StorageInner};

/// Deletes every expired auth request, auth code, device request and device
/// token.
pub(crate) async fn collect(
    storage: &KubernetesStorage,
    now: OffsetDateTime,
) -> StorageResult<GcResult> {
    let mut result = GcResult::default();
    match collect_all(storage, now, &mut result).await {
        Ok(()) => Ok(result),
        Err(e) => {
            if !result.is_empty() {
                warn!(
                    auth_requests = result.auth_requests,
                    auth_codes = result.auth_codes,
                    device_requests = result.device_requests,
                    device_tokens = result.device_tokens,
                    error = %e,
                    "Garbage collection stopped after partial progress"
                );
            }
            Err(e)
        }
    }
}

async fn collect_all(
    storage: &KubernetesStorage,
    now: OffsetDateTime,
    result: &mut GcResult,
) -> StorageResult<()> {
    result.auth_requests = collect_kind::<AuthRequest>(storage, now).await?;
    result.auth_codes = collect_kind::<AuthCode>(storage, now).await?;
    result.device_requests = collect_kind::<DeviceRequest>(storage, now).await?;
    result.device_tokens = collect_kind::<DeviceToken>(storage, now).await?;
    Ok(())
}

async fn collect_kind<E: Expiring>(
    storage: &KubernetesStorage,
    now: OffsetDateTime,
) -> StorageResult<u64> {
    let resources = storage.list_resources::<E>().await?;
    let mut deleted = 0;

    for resource in resources {
        let name = resource.metadata.name.clone();
        let entity: E = from_resource(resource);
        if entity.expiry() >= now {
            continue;
        }

        match storage.delete_resource::<E>(&name).await {
            Ok(()) => deleted += 1,
            // Removed concurrently, e.g. by another instance's collector.
            Err(e) if e.is_not_found() => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => warn!(
                kind = E::KIND.plural,
                name = %name,
                error = %e,
                "Failed to delete expired object"
            ),
        }
    }

    Ok(deleted)
}

/// Spawns the periodic collector. The task holds only a weak reference to
/// the storage and stops once it is gone.
pub(crate) fn spawn_runner(
    inner: &Arc<StorageInner>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    let inner: Weak<StorageInner> = Arc::downgrade(inner);

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting garbage collector");
        loop {
            if !shutdown.sleep(interval).await {
                break;
            }
            let Some(storage) = KubernetesStorage::from_weak(&inner) else {
                break;
            };

            let now = clock.now();
            match collect(&storage, now).await {
                Ok(result) if result.is_empty() => {
                    debug!("Garbage collection found nothing to delete");
                }
                Ok(result) => info!(
                    auth_requests = result.auth_requests,
                    auth_codes = result.auth_codes,
                    device_requests = result.device_requests,
                    device_tokens = result.device_tokens,
                    "Garbage collection completed"
                ),
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "Garbage collection failed"),
            }
        }
        debug!("Garbage collector stopped");
    })
}
