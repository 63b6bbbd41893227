//! Behavior when the chunk store misbehaves: retries, failed commits that
//! keep local data, cache backpressure and refused sessions.
mod common;

use ::common::auth::{hash_token, Principal, StaticTokenProvider, TokenEntry};
use ::common::config::MountConfig;
use ::common::session::Session;
use ::common::sync::FileSyncStatus;
use ::common::vfs::OpenMode;
use std::time::Duration;

#[tokio::test]
async fn test_transient_put_failures_are_retried() {
    let env = common::setup_session().await;
    env.store.fail_next_puts(2);

    let data = common::pattern(1500);
    common::write_file(env.bridge(), "/retried.bin", &data).await;

    let record = common::record(&env.catalog, "/retried.bin").await;
    assert_eq!(record.size, 1500);
    assert_eq!(record.chunks.len(), 3);
    assert_eq!(common::read_file(env.bridge(), "/retried.bin").await, data);
}

#[tokio::test]
async fn test_offline_flush_keeps_local_changes() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    env.store.set_offline(true);

    let opened = bridge.create("/offline.txt").await.unwrap();
    bridge.write(opened.fh, 0, b"written offline").await.unwrap();

    let attr = bridge.getattr("/offline.txt").await.unwrap();
    assert!(attr.dirty);
    assert_eq!(attr.version, 1);
    assert_eq!(attr.size, 15);

    let err = bridge.flush(opened.fh).await.unwrap_err();
    assert_eq!(err.errno(), libc::EIO);

    // still readable from the cache, catalog untouched
    let data = bridge.read(opened.fh, 0, 100).await.unwrap();
    assert_eq!(&data[..], b"written offline");
    assert_eq!(common::record(&env.catalog, "/offline.txt").await.size, 0);

    env.store.set_offline(false);
    bridge.flush(opened.fh).await.unwrap();
    bridge.release(opened.fh).await.unwrap();

    let record = common::record(&env.catalog, "/offline.txt").await;
    assert_eq!(record.version, 2);
    assert_eq!(record.size, 15);

    let other = env.second_session(common::test_config()).await;
    assert_eq!(
        common::read_file(other.bridge(), "/offline.txt").await,
        b"written offline"
    );
    other.unmount().await.unwrap();
}

#[tokio::test]
async fn test_failed_job_can_be_retried() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    env.store.set_offline(true);

    let opened = bridge.create("/retry.txt").await.unwrap();
    bridge.write(opened.fh, 0, b"second attempt").await.unwrap();

    let status = common::wait_for_status(bridge, "/retry.txt", |s| {
        matches!(s, FileSyncStatus::Failed { .. })
    })
    .await;
    let FileSyncStatus::Failed { job, .. } = status else {
        unreachable!()
    };

    env.store.set_offline(false);
    env.session.coordinator().retry(job).await.unwrap();
    common::wait_for_status(bridge, "/retry.txt", |s| *s == FileSyncStatus::Clean).await;

    assert_eq!(common::record(&env.catalog, "/retry.txt").await.version, 2);
    bridge.release(opened.fh).await.unwrap();
    assert_eq!(
        common::read_file(bridge, "/retry.txt").await,
        b"second attempt"
    );
}

#[tokio::test]
async fn test_abandoned_release_cancels_pending_retries() {
    let env = common::setup_session_with(MountConfig {
        max_retry_attempts: 50,
        retry_backoff_base_ms: 20,
        retry_backoff_ceiling_ms: 20,
        ..common::test_config()
    })
    .await;
    let bridge = env.bridge();
    env.store.set_offline(true);

    let opened = bridge.create("/closing.txt").await.unwrap();
    bridge.write(opened.fh, 0, b"kept locally").await.unwrap();

    // give up on the release while the commit is backing off
    let released =
        tokio::time::timeout(Duration::from_millis(100), bridge.release(opened.fh)).await;
    assert!(released.is_err());
    assert_eq!(bridge.open_handles(), 0);

    let status = common::wait_for_status(bridge, "/closing.txt", |s| {
        matches!(s, FileSyncStatus::Failed { .. })
    })
    .await;
    let FileSyncStatus::Failed { error, .. } = status else {
        unreachable!()
    };
    assert!(error.contains("cancelled"), "got {}", error);

    let attr = bridge.getattr("/closing.txt").await.unwrap();
    assert!(attr.dirty);
    assert_eq!(attr.size, 12);
    assert_eq!(common::record(&env.catalog, "/closing.txt").await.size, 0);

    env.store.set_offline(false);
    let reopened = bridge
        .open("/closing.txt", OpenMode::READ_WRITE)
        .await
        .unwrap();
    bridge.release(reopened.fh).await.unwrap();
    assert_eq!(common::record(&env.catalog, "/closing.txt").await.size, 12);
    assert_eq!(
        common::read_file(bridge, "/closing.txt").await,
        b"kept locally"
    );
}

#[tokio::test]
async fn test_dirty_budget_applies_backpressure() {
    let env = common::setup_session_with(MountConfig {
        cache_max_bytes: 2048,
        ..common::test_config()
    })
    .await;
    let bridge = env.bridge();
    env.store.set_offline(true);

    let opened = bridge.create("/budget.bin").await.unwrap();
    bridge
        .write(opened.fh, 0, &common::pattern(2048))
        .await
        .unwrap();

    let err = bridge.write(opened.fh, 2048, b"x").await.unwrap_err();
    assert_eq!(err.errno(), libc::EAGAIN);

    env.store.set_offline(false);
    bridge.flush(opened.fh).await.unwrap();
    bridge.write(opened.fh, 2048, b"x").await.unwrap();
    bridge.release(opened.fh).await.unwrap();

    let mut expected = common::pattern(2048);
    expected.push(b'x');
    assert_eq!(common::read_file(bridge, "/budget.bin").await, expected);
}

#[tokio::test]
async fn test_read_only_principal_cannot_mutate() {
    let env = common::setup_session().await;
    common::write_file(env.bridge(), "/shared.txt", b"shared").await;

    let reader = env
        .session_as(
            common::test_config(),
            Principal {
                id: "reader".to_string(),
                name: "reader".to_string(),
                can_write: false,
            },
        )
        .await;
    let bridge = reader.bridge();

    assert_eq!(
        bridge.create("/new.txt").await.unwrap_err().errno(),
        libc::EACCES
    );
    assert_eq!(
        bridge
            .open("/shared.txt", OpenMode::WRITE)
            .await
            .unwrap_err()
            .errno(),
        libc::EACCES
    );
    assert_eq!(
        bridge.unlink("/shared.txt").await.unwrap_err().errno(),
        libc::EACCES
    );
    assert_eq!(common::read_file(bridge, "/shared.txt").await, b"shared");
    reader.unmount().await.unwrap();
}

#[tokio::test]
async fn test_mount_with_token() {
    let env = common::setup_session().await;
    let auth = StaticTokenProvider::new([TokenEntry {
        name: "ci".to_string(),
        token_sha256: hash_token("s3cret"),
        can_write: true,
        expires_at: None,
    }]);

    let err = Session::mount_with_token(
        common::test_config(),
        env.master.clone(),
        env.store.clone(),
        env.catalog.clone(),
        &auth,
        "wrong",
    )
    .await
    .unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);

    let session = Session::mount_with_token(
        common::test_config(),
        env.master.clone(),
        env.store.clone(),
        env.catalog.clone(),
        &auth,
        "s3cret",
    )
    .await
    .unwrap();
    assert_eq!(session.bridge().principal().name, "ci");
    session.unmount().await.unwrap();
}
