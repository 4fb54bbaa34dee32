//! Refresh token lock behaviour under contention.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;
use support::*;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use warden_storage::{Storage, StorageError};
use warden_storage_k8s::{LOCK_ANNOTATION, LockConfig};

fn lease_in(offset: time::Duration) -> String {
    (OffsetDateTime::now_utc() + offset).format(&Rfc3339).unwrap()
}

fn lock_annotation(object: &Value) -> Option<&str> {
    object["metadata"]["annotations"]
        .get(LOCK_ANNOTATION)
        .and_then(Value::as_str)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotations_run_one_at_a_time() {
    let cluster = FakeCluster::start().await;
    let storage = cluster.open().await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();

    let active = Arc::new(AtomicU32::new(0));
    let max_active = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let storage = storage.clone();
        let active = active.clone();
        let max_active = max_active.clone();
        handles.push(tokio::spawn(async move {
            storage
                .update_refresh_token("rt-1", &move |mut token| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::task::block_in_place(|| {
                        std::thread::sleep(Duration::from_millis(20));
                    });
                    active.fetch_sub(1, Ordering::SeqCst);

                    token.token.push('x');
                    Ok(token)
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    let token = storage.get_refresh_token("rt-1").await.unwrap();
    assert_eq!(token.token, "barxxxxxx");

    let object = cluster.object("refreshtokens", "rt-1").unwrap();
    assert_eq!(lock_annotation(&object), None);
}

#[tokio::test]
async fn test_live_lease_times_out() {
    let cluster = FakeCluster::start().await;
    let config = cluster.config().with_lock(LockConfig {
        timeout: Duration::from_secs(10),
        check_period: Duration::from_millis(10),
        check_attempts: 3,
    });
    let storage = cluster.open_with(config).await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();

    let lease = lease_in(time::Duration::hours(1));
    cluster.set_annotation("refreshtokens", "rt-1", LOCK_ANNOTATION, &lease);

    let calls = AtomicU32::new(0);
    let err = storage
        .update_refresh_token("rt-1", &|token| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(token)
        })
        .await
        .unwrap_err();

    assert!(err.is_lock_timeout());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.requests("PUT", "/refreshtokens/rt-1"), 0);

    // The other holder's lease is left alone.
    let object = cluster.object("refreshtokens", "rt-1").unwrap();
    assert_eq!(lock_annotation(&object), Some(lease.as_str()));
}

#[tokio::test]
async fn test_expired_lease_is_broken() {
    let cluster = FakeCluster::start().await;
    let storage = cluster.open().await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();
    cluster.set_annotation(
        "refreshtokens",
        "rt-1",
        LOCK_ANNOTATION,
        &lease_in(-time::Duration::minutes(5)),
    );

    storage
        .update_refresh_token("rt-1", &|mut token| {
            token.token = "rotated".to_string();
            Ok(token)
        })
        .await
        .unwrap();

    assert_eq!(storage.get_refresh_token("rt-1").await.unwrap().token, "rotated");
    let object = cluster.object("refreshtokens", "rt-1").unwrap();
    assert_eq!(lock_annotation(&object), None);
}

#[tokio::test]
async fn test_waiter_proceeds_after_release() {
    let cluster = Arc::new(FakeCluster::start().await);
    let storage = cluster.open().await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();
    cluster.set_annotation(
        "refreshtokens",
        "rt-1",
        LOCK_ANNOTATION,
        &lease_in(time::Duration::hours(1)),
    );

    let releaser = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cluster.set_annotation("refreshtokens", "rt-1", LOCK_ANNOTATION, "");
        })
    };

    storage
        .update_refresh_token("rt-1", &|mut token| {
            token.nonce = "after-release".to_string();
            Ok(token)
        })
        .await
        .unwrap();
    releaser.await.unwrap();

    assert_eq!(
        storage.get_refresh_token("rt-1").await.unwrap().nonce,
        "after-release"
    );
    let object = cluster.object("refreshtokens", "rt-1").unwrap();
    assert_eq!(lock_annotation(&object), None);
}

#[tokio::test]
async fn test_lock_released_when_updater_fails() {
    let cluster = FakeCluster::start().await;
    let storage = cluster.open().await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();

    let err = storage
        .update_refresh_token("rt-1", &|_| Err(StorageError::rejected("token reused")))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Rejected { .. }));

    let object = cluster.object("refreshtokens", "rt-1").unwrap();
    assert_eq!(lock_annotation(&object), None);
    assert_eq!(storage.get_refresh_token("rt-1").await.unwrap().token, "bar");
}

#[tokio::test]
async fn test_malformed_lease_is_internal_error() {
    let cluster = FakeCluster::start().await;
    let storage = cluster.open().await;
    storage.create_refresh_token(&refresh_token("rt-1")).await.unwrap();
    cluster.set_annotation("refreshtokens", "rt-1", LOCK_ANNOTATION, "not-a-time");

    let err = storage
        .update_refresh_token("rt-1", &|token| Ok(token))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Internal { .. }));
}

#[tokio::test]
async fn test_missing_token_is_not_found() {
    let cluster = FakeCluster::start().await;
    let storage = cluster.open().await;

    let err = storage
        .update_refresh_token("rt-missing", &|token| Ok(token))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
