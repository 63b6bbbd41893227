//! Tampered, missing and foreign ciphertext is never served as plaintext.
mod common;

use ::common::auth::Principal;
use ::common::crypto::Secret;
use ::common::error::FsError;
use ::common::session::Session;
use ::common::vfs::OpenMode;

#[tokio::test]
async fn test_store_never_sees_plaintext() {
    let env = common::setup_session().await;
    let secret = b"the quick brown fox jumps over the lazy dog".repeat(20);
    common::write_file(env.bridge(), "/secret.txt", &secret).await;

    let needle = &secret[..32];
    for key in env.store.inner.keys() {
        let mut found = false;
        env.store.inner.tamper(&key, |ciphertext| {
            found = ciphertext.windows(needle.len()).any(|w| w == needle);
        });
        assert!(!found, "plaintext leaked into chunk {}", key);
    }
}

#[tokio::test]
async fn test_tampered_chunk_is_rejected() {
    let env = common::setup_session().await;
    let data = common::pattern(1200);
    common::write_file(env.bridge(), "/tampered.bin", &data).await;

    let record = common::record(&env.catalog, "/tampered.bin").await;
    let victim = record.chunks[1].storage_key;
    assert!(env.store.inner.tamper(&victim, |ciphertext| {
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
    }));

    // a fresh session has nothing cached
    let reader = env.second_session(common::test_config()).await;
    let opened = reader
        .bridge()
        .open("/tampered.bin", OpenMode::READ)
        .await
        .unwrap();

    let first = reader.bridge().read(opened.fh, 0, 512).await.unwrap();
    assert_eq!(&first[..], &data[..512]);

    let err = reader.bridge().read(opened.fh, 512, 512).await.unwrap_err();
    assert!(matches!(err, FsError::Integrity(_)), "got {:?}", err);
    assert_eq!(err.errno(), libc::EIO);
    reader.bridge().release(opened.fh).await.unwrap();
}

#[tokio::test]
async fn test_missing_chunk_is_not_found() {
    let env = common::setup_session().await;
    common::write_file(env.bridge(), "/hidden.bin", &common::pattern(700)).await;

    let record = common::record(&env.catalog, "/hidden.bin").await;
    env.store.hide(record.chunks[0].storage_key);

    let reader = env.second_session(common::test_config()).await;
    let opened = reader
        .bridge()
        .open("/hidden.bin", OpenMode::READ)
        .await
        .unwrap();
    let err = reader.bridge().read(opened.fh, 0, 100).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn test_wrong_master_key_is_refused() {
    let env = common::setup_session().await;
    common::write_file(env.bridge(), "/a.txt", b"a").await;

    let err = Session::mount(
        common::test_config(),
        Secret::generate().unwrap(),
        env.store.clone(),
        env.catalog.clone(),
        Principal::local(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FsError::Auth(_)), "got {:?}", err);
    assert_eq!(err.errno(), libc::EACCES);
}

#[tokio::test]
async fn test_chunk_moved_between_files_is_rejected() {
    let env = common::setup_session().await;
    common::write_file(env.bridge(), "/one.txt", b"identical").await;
    common::write_file(env.bridge(), "/two.txt", b"different").await;

    // point /two.txt's chunk ciphertext at /one.txt's
    let one = common::record(&env.catalog, "/one.txt").await;
    let two = common::record(&env.catalog, "/two.txt").await;
    assert_eq!(env.store.inner.len(), 2);
    let mut ciphertext = Vec::new();
    env.store
        .inner
        .tamper(&one.chunks[0].storage_key, |c| ciphertext = c.clone());
    env.store
        .inner
        .tamper(&two.chunks[0].storage_key, |c| *c = ciphertext.clone());

    let reader = env.second_session(common::test_config()).await;
    let opened = reader
        .bridge()
        .open("/two.txt", OpenMode::READ)
        .await
        .unwrap();
    let err = reader.bridge().read(opened.fh, 0, 9).await.unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
}
