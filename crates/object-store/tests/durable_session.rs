//! A session mounted over the SQLite catalog and a local object store.

use std::path::Path;
use std::sync::Arc;

use common::auth::Principal;
use common::catalog::MetadataCatalog;
use common::config::MountConfig;
use common::crypto::Secret;
use common::error::FsError;
use common::session::Session;
use common::store::ChunkStore;
use common::vfs::OpenMode;
use vaultfs_object_store::{ChunkStoreConfig, ObjectChunkStore, SqliteCatalog};

fn config() -> MountConfig {
    MountConfig {
        block_size: 1024,
        retry_backoff_base_ms: 1,
        retry_backoff_ceiling_ms: 2,
        ..Default::default()
    }
}

async fn mount(dir: &Path, master: &Secret) -> (Session, Arc<ObjectChunkStore>) {
    let store = Arc::new(
        ObjectChunkStore::new(ChunkStoreConfig::Local {
            path: dir.join("chunks"),
        })
        .await
        .unwrap(),
    );
    let catalog: Arc<dyn MetadataCatalog> = Arc::new(
        SqliteCatalog::open(&dir.join("catalog.sqlite"))
            .await
            .unwrap(),
    );
    let session = Session::mount(
        config(),
        master.clone(),
        store.clone() as Arc<dyn ChunkStore>,
        catalog,
        Principal::local(),
    )
    .await
    .unwrap();
    (session, store)
}

#[tokio::test]
async fn test_data_survives_remount() {
    let dir = tempfile::tempdir().unwrap();
    let master = Secret::generate().unwrap();
    let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

    {
        let (session, _) = mount(dir.path(), &master).await;
        let bridge = session.bridge();
        bridge.mkdir("/photos").await.unwrap();
        let opened = bridge.create("/photos/raw.bin").await.unwrap();
        bridge.write(opened.fh, 0, &data).await.unwrap();
        bridge.release(opened.fh).await.unwrap();
        session.unmount().await.unwrap();
    }

    let (session, store) = mount(dir.path(), &master).await;
    let bridge = session.bridge();
    let attr = bridge.getattr("/photos/raw.bin").await.unwrap();
    assert_eq!(attr.size, 5000);
    assert_eq!(attr.version, 2);

    let opened = bridge.open("/photos/raw.bin", OpenMode::READ).await.unwrap();
    let read = bridge.read(opened.fh, 0, 5000).await.unwrap();
    assert_eq!(&read[..], &data[..]);
    bridge.release(opened.fh).await.unwrap();

    assert_eq!(store.list_keys().await.unwrap().len(), 5);
    bridge.unlink("/photos/raw.bin").await.unwrap();
    assert!(store.list_keys().await.unwrap().is_empty());
    session.unmount().await.unwrap();
}

#[tokio::test]
async fn test_wrong_master_key_cannot_mount() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _) = mount(dir.path(), &Secret::generate().unwrap()).await;
    session.unmount().await.unwrap();

    let store = Arc::new(
        ObjectChunkStore::new(ChunkStoreConfig::Local {
            path: dir.path().join("chunks"),
        })
        .await
        .unwrap(),
    );
    let catalog = Arc::new(
        SqliteCatalog::open(&dir.path().join("catalog.sqlite"))
            .await
            .unwrap(),
    );
    let err = Session::mount(
        config(),
        Secret::generate().unwrap(),
        store,
        catalog,
        Principal::local(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FsError::Auth(_)), "got {:?}", err);
}
