mod common;

use std::sync::Arc;

use tempfile::TempDir;

use segment_cache::{CacheKey, CachedFileReader, RemoteFileReader, State};

use common::{MockRemote, test_cache};

const SEGMENT: u64 = 65_536;

#[test]
fn read_through_miss_then_hit() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 10_000_000, SEGMENT);
    let remote = Arc::new(MockRemote::new(262_144));
    let key = CacheKey::from_path("it/file-a");
    let reader = CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    );

    let data = reader.read(0, 100_000).unwrap();
    assert_eq!(&data[..], remote.expected(0, 100_000));

    // Segments tile exactly the requested span, so the downloader fetched
    // each touched segment's full range and nothing beyond the request.
    assert_eq!(remote.bytes_read(), 100_000);
    assert!(cache.contains(key, 0, 100_000));

    let reads_after_miss = remote.read_count();
    let data = reader.read(0, 100_000).unwrap();
    assert_eq!(&data[..], remote.expected(0, 100_000));
    assert_eq!(remote.read_count(), reads_after_miss);
}

#[test]
fn unaligned_reads_return_correct_bytes() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 10_000_000, SEGMENT);
    let remote = Arc::new(MockRemote::new(500_000));
    let key = CacheKey::from_path("it/file-b");
    let reader = CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    );

    for (offset, len) in [
        (0u64, 1u64),
        (1, 2),
        (SEGMENT - 1, 2),
        (SEGMENT, SEGMENT),
        (123_456, 200_000),
        (499_999, 1),
    ] {
        let data = reader.read(offset, len).unwrap();
        assert_eq!(
            &data[..],
            remote.expected(offset, len as usize),
            "mismatch at offset {offset}, len {len}"
        );
    }
}

#[test]
fn sequential_scan_stays_within_capacity() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 2 * SEGMENT, SEGMENT);
    let remote = Arc::new(MockRemote::new(8 * SEGMENT as usize));
    let key = CacheKey::from_path("it/file-c");
    let reader = CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    );

    for i in 0..8 {
        let offset = i * SEGMENT;
        let data = reader.read(offset, SEGMENT).unwrap();
        assert_eq!(&data[..], remote.expected(offset, SEGMENT as usize));
        assert!(cache.used_size() <= 2 * SEGMENT);
    }

    // Re-reading the whole file is still correct after evictions.
    let data = reader.read(0, 8 * SEGMENT).unwrap();
    assert_eq!(&data[..], remote.expected(0, 8 * SEGMENT as usize));
}

#[test]
fn remote_failure_leaves_segment_resumable() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 10_000_000, SEGMENT);
    let remote = Arc::new(MockRemote::new(2 * SEGMENT as usize));
    let key = CacheKey::from_path("it/file-d");
    let reader = CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    )
    .with_chunk_size(16_384);

    // The download dies after the first chunk.
    {
        let holder = cache.get_or_set(key, 0, SEGMENT).unwrap();
        let segment = &holder.segments()[0];
        assert!(matches!(
            segment.get_or_set_downloader().unwrap(),
            segment_cache::DownloaderClaim::Claimed(_)
        ));
        assert!(segment.reserve(16_384).unwrap());
        let chunk = remote.read(0, 16_384).unwrap();
        segment.write(&chunk, 0).unwrap();

        remote.fail_next_reads(1);
        assert!(remote.read(16_384, 16_384).is_err());
        segment.complete_with(State::PartiallyDownloaded).unwrap();
        assert_eq!(segment.state(), State::PartiallyDownloaded);
    }

    // The remote recovered; the next read resumes after the prefix
    // instead of refetching it.
    let data = reader.read(0, SEGMENT).unwrap();
    assert_eq!(&data[..], remote.expected(0, SEGMENT as usize));
    assert_eq!(remote.bytes_read(), SEGMENT);

    let holder = cache.get_or_set(key, 0, SEGMENT).unwrap();
    assert_eq!(holder.segments()[0].state(), State::Downloaded);
}

#[test]
fn remove_file_forces_fresh_download() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 10_000_000, SEGMENT);
    let remote = Arc::new(MockRemote::new(2 * SEGMENT as usize));
    let key = CacheKey::from_path("it/file-e");
    let reader = CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    );

    reader.read(0, SEGMENT).unwrap();
    assert!(cache.contains(key, 0, SEGMENT));

    assert_eq!(cache.remove_file(key), 1);
    assert!(!cache.contains(key, 0, SEGMENT));

    let before = remote.bytes_read();
    let data = reader.read(0, SEGMENT).unwrap();
    assert_eq!(&data[..], remote.expected(0, SEGMENT as usize));
    assert!(remote.bytes_read() > before);
}
