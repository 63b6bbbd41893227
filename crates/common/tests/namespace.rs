//! Directory operations, renames and garbage collection of removed files.
mod common;

use ::common::catalog::EntryKind;
use ::common::vfs::OpenMode;

#[tokio::test]
async fn test_mkdir_and_readdir() {
    let env = common::setup_session().await;
    let bridge = env.bridge();

    let dir = bridge.mkdir("/docs").await.unwrap();
    assert!(dir.is_dir());
    bridge.mkdir("/docs/drafts").await.unwrap();
    common::write_file(bridge, "/docs/b.txt", b"bee").await;
    common::write_file(bridge, "/docs/a.txt", b"a").await;

    let listing = bridge.readdir("/docs").await.unwrap();
    let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "drafts"]);
    assert_eq!(listing[1].size, 3);
    assert_eq!(listing[2].kind, EntryKind::Directory);

    assert_eq!(
        bridge.mkdir("/docs").await.unwrap_err().errno(),
        libc::EEXIST
    );
    assert_eq!(
        bridge.mkdir("/missing/dir").await.unwrap_err().errno(),
        libc::ENOENT
    );
    assert_eq!(
        bridge.readdir("/docs/a.txt").await.unwrap_err().errno(),
        libc::ENOTDIR
    );
    assert_eq!(
        bridge
            .open("/docs", OpenMode::READ)
            .await
            .unwrap_err()
            .errno(),
        libc::EISDIR
    );
}

#[tokio::test]
async fn test_readdir_shows_unflushed_size() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    env.store.set_offline(true);

    let opened = bridge.create("/pending.txt").await.unwrap();
    bridge.write(opened.fh, 0, b"not yet synced").await.unwrap();

    let listing = bridge.readdir("/").await.unwrap();
    let row = listing.iter().find(|e| e.name == "pending.txt").unwrap();
    assert!(row.dirty);
    assert_eq!(row.size, 14);
}

#[tokio::test]
async fn test_rmdir() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    bridge.mkdir("/full").await.unwrap();
    common::write_file(bridge, "/full/x", b"x").await;

    assert_eq!(
        bridge.rmdir("/full").await.unwrap_err().errno(),
        libc::ENOTEMPTY
    );
    assert_eq!(
        bridge.rmdir("/full/x").await.unwrap_err().errno(),
        libc::ENOTDIR
    );
    bridge.unlink("/full/x").await.unwrap();
    bridge.rmdir("/full").await.unwrap();
    assert_eq!(
        bridge.lookup("/full").await.unwrap_err().errno(),
        libc::ENOENT
    );
}

#[tokio::test]
async fn test_unlink_collects_chunks() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    common::write_file(bridge, "/keep.bin", &common::pattern(600)).await;
    let kept = env.store.inner.len();
    assert_eq!(kept, 2);

    common::write_file(bridge, "/gone.bin", &common::pattern(1500)).await;
    assert_eq!(env.store.inner.len(), kept + 3);

    bridge.unlink("/gone.bin").await.unwrap();
    assert_eq!(env.store.inner.len(), kept);
    assert_eq!(
        bridge.lookup("/gone.bin").await.unwrap_err().errno(),
        libc::ENOENT
    );
    assert_eq!(
        bridge.unlink("/gone.bin").await.unwrap_err().errno(),
        libc::ENOENT
    );
    assert_eq!(
        common::read_file(bridge, "/keep.bin").await,
        common::pattern(600)
    );
}

#[tokio::test]
async fn test_unlinked_file_handle_is_stale() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    common::write_file(bridge, "/open.txt", b"still open").await;

    let opened = bridge.open("/open.txt", OpenMode::READ).await.unwrap();
    bridge.unlink("/open.txt").await.unwrap();
    assert_eq!(
        bridge.read(opened.fh, 0, 10).await.unwrap_err().errno(),
        libc::ENOENT
    );
    bridge.release(opened.fh).await.unwrap();
    assert_eq!(bridge.open_handles(), 0);
}

#[tokio::test]
async fn test_rename_file_and_directory() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    bridge.mkdir("/src").await.unwrap();
    bridge.mkdir("/dst").await.unwrap();
    common::write_file(bridge, "/src/notes.txt", b"notes").await;

    let opened = bridge.open("/src/notes.txt", OpenMode::READ_WRITE).await.unwrap();
    let attr = bridge.rename("/src/notes.txt", "/dst/renamed.txt").await.unwrap();
    assert_eq!(attr.path, "/dst/renamed.txt");

    // the open handle follows the file
    bridge.write(opened.fh, 5, b" moved").await.unwrap();
    bridge.release(opened.fh).await.unwrap();
    assert_eq!(
        common::read_file(bridge, "/dst/renamed.txt").await,
        b"notes moved"
    );
    assert!(bridge.readdir("/src").await.unwrap().is_empty());

    bridge.rename("/dst", "/archive").await.unwrap();
    assert_eq!(
        common::read_file(bridge, "/archive/renamed.txt").await,
        b"notes moved"
    );
    assert_eq!(
        bridge.lookup("/dst").await.unwrap_err().errno(),
        libc::ENOENT
    );
}

#[tokio::test]
async fn test_rename_replaces_target() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    common::write_file(bridge, "/old.txt", b"old contents").await;
    common::write_file(bridge, "/new.txt", &common::pattern(1100)).await;
    assert_eq!(env.store.inner.len(), 4);

    bridge.rename("/new.txt", "/old.txt").await.unwrap();
    assert_eq!(
        common::read_file(bridge, "/old.txt").await,
        common::pattern(1100)
    );
    // the replaced file's single chunk is collected
    assert_eq!(env.store.inner.len(), 3);
    assert_eq!(
        bridge.lookup("/new.txt").await.unwrap_err().errno(),
        libc::ENOENT
    );
}

#[tokio::test]
async fn test_rename_is_atomic_to_listing() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    bridge.mkdir("/d").await.unwrap();
    common::write_file(bridge, "/d/a.txt", b"payload").await;

    let renames = async {
        for _ in 0..50 {
            bridge.rename("/d/a.txt", "/d/b.txt").await.unwrap();
            tokio::task::yield_now().await;
            bridge.rename("/d/b.txt", "/d/a.txt").await.unwrap();
            tokio::task::yield_now().await;
        }
    };
    let listings = async {
        for _ in 0..200 {
            let listing = bridge.readdir("/d").await.unwrap();
            assert_eq!(listing.len(), 1, "saw {:?}", listing);
            assert!(listing[0].name == "a.txt" || listing[0].name == "b.txt");
            tokio::task::yield_now().await;
        }
    };
    tokio::join!(renames, listings);

    assert_eq!(common::read_file(bridge, "/d/a.txt").await, b"payload");
}
