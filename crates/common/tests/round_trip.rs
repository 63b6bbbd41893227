//! Integration tests for reading back what was written through the bridge

mod common;

use ::common::vfs::OpenMode;

#[tokio::test]
async fn test_round_trip_at_unaligned_offsets() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    let data = common::pattern(3000);

    let opened = bridge.create("/unaligned.bin").await.unwrap();
    // write in odd-sized pieces that straddle 512-byte blocks
    let mut offset = 0;
    for piece in data.chunks(333) {
        bridge.write(opened.fh, offset, piece).await.unwrap();
        offset += piece.len() as u64;
    }

    // reads before the flush see the dirty state
    let partial = bridge.read(opened.fh, 500, 30).await.unwrap();
    assert_eq!(&partial[..], &data[500..530]);
    bridge.release(opened.fh).await.unwrap();

    assert_eq!(common::read_file(bridge, "/unaligned.bin").await, data);

    let record = common::record(&env.catalog, "/unaligned.bin").await;
    assert_eq!(record.size, 3000);
    assert_eq!(record.chunks.len(), 6);
    assert!(record.chunks[..5].iter().all(|c| c.len == 512));
    assert_eq!(record.chunks[5].len, 3000 - 5 * 512);
}

#[tokio::test]
async fn test_ten_mib_file_with_4k_blocks() {
    let mut config = common::test_config();
    config.block_size = 4096;
    config.cache_max_bytes = 64 * 1024 * 1024;
    let env = common::setup_session_with(config.clone()).await;
    let bridge = env.bridge();

    let data = common::pattern(10 * 1024 * 1024);
    common::write_file(bridge, "/big.bin", &data).await;

    let record = common::record(&env.catalog, "/big.bin").await;
    assert_eq!(record.chunks.len(), (10 * 1024 * 1024usize).div_ceil(4096));
    assert_eq!(record.chunks.len(), 2560);

    // read through a fresh session so every chunk comes from the store
    let other = env.second_session(config).await;
    assert_eq!(common::read_file(other.bridge(), "/big.bin").await, data);
}

#[tokio::test]
async fn test_overwrite_in_the_middle() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    let mut expected = common::pattern(2048);
    common::write_file(bridge, "/patch.bin", &expected).await;

    let opened = bridge
        .open("/patch.bin", OpenMode::READ_WRITE)
        .await
        .unwrap();
    bridge.write(opened.fh, 700, b"patched").await.unwrap();
    bridge.release(opened.fh).await.unwrap();
    expected[700..707].copy_from_slice(b"patched");

    assert_eq!(common::read_file(bridge, "/patch.bin").await, expected);
    let record = common::record(&env.catalog, "/patch.bin").await;
    assert_eq!(record.version, 3);
}

#[tokio::test]
async fn test_remount_with_other_block_size_keeps_layout() {
    let env = common::setup_session().await;
    let mut expected = common::pattern(2048);
    common::write_file(env.bridge(), "/f", &expected).await;

    let mut config = common::test_config();
    config.block_size = 1024;
    let other = env.second_session(config).await;
    let bridge = other.bridge();
    assert_eq!(bridge.block_size(), 512);

    let opened = bridge.open("/f", OpenMode::READ_WRITE).await.unwrap();
    bridge.write(opened.fh, 600, b"XXXXXXXXXX").await.unwrap();
    bridge.release(opened.fh).await.unwrap();
    expected[600..610].copy_from_slice(b"XXXXXXXXXX");

    bridge.truncate("/f", 1800).await.unwrap();
    expected.truncate(1800);

    assert_eq!(common::read_file(bridge, "/f").await, expected);
    let record = common::record(&env.catalog, "/f").await;
    assert_eq!(record.size, 1800);
    let lens: Vec<u32> = record.chunks.iter().map(|c| c.len).collect();
    assert_eq!(lens, vec![512, 512, 512, 264]);
    other.unmount().await.unwrap();
}

#[tokio::test]
async fn test_write_past_end_zero_fills() {
    let env = common::setup_session().await;
    let bridge = env.bridge();

    let opened = bridge.create("/sparse.bin").await.unwrap();
    bridge.write(opened.fh, 0, b"head").await.unwrap();
    bridge.write(opened.fh, 1500, b"tail").await.unwrap();
    bridge.release(opened.fh).await.unwrap();

    let data = common::read_file(bridge, "/sparse.bin").await;
    assert_eq!(data.len(), 1504);
    assert_eq!(&data[..4], b"head");
    assert!(data[4..1500].iter().all(|b| *b == 0));
    assert_eq!(&data[1500..], b"tail");
}

#[tokio::test]
async fn test_truncate_shrinks_and_grows() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    let data = common::pattern(1300);
    common::write_file(bridge, "/t.bin", &data).await;

    let attr = bridge.truncate("/t.bin", 600).await.unwrap();
    assert_eq!(attr.size, 600);
    assert_eq!(common::read_file(bridge, "/t.bin").await, &data[..600]);

    bridge.truncate("/t.bin", 1030).await.unwrap();
    let grown = common::read_file(bridge, "/t.bin").await;
    assert_eq!(&grown[..600], &data[..600]);
    assert!(grown[600..].iter().all(|b| *b == 0));
    assert_eq!(common::record(&env.catalog, "/t.bin").await.chunks.len(), 3);

    bridge.truncate("/t.bin", 0).await.unwrap();
    let record = common::record(&env.catalog, "/t.bin").await;
    assert_eq!(record.size, 0);
    assert!(record.chunks.is_empty());
}

#[tokio::test]
async fn test_append_mode_writes_at_end() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    common::write_file(bridge, "/log.txt", b"line one\n").await;

    let opened = bridge
        .open("/log.txt", OpenMode::WRITE.appending())
        .await
        .unwrap();
    bridge.write(opened.fh, 0, b"line two\n").await.unwrap();
    bridge.release(opened.fh).await.unwrap();

    assert_eq!(
        common::read_file(bridge, "/log.txt").await,
        b"line one\nline two\n"
    );
}

#[tokio::test]
async fn test_read_only_handle_rejects_writes() {
    let env = common::setup_session().await;
    let bridge = env.bridge();
    common::write_file(bridge, "/ro.txt", b"data").await;

    let opened = bridge.open("/ro.txt", OpenMode::READ).await.unwrap();
    let err = bridge.write(opened.fh, 0, b"x").await.unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);
    bridge.release(opened.fh).await.unwrap();
}
