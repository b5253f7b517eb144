mod common;

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use segment_cache::{CacheKey, CachedFileReader, RemoteFileReader};

use common::{MockRemote, test_cache};

const SEGMENT: u64 = 65_536;

#[test]
fn concurrent_readers_share_one_download() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 10_000_000, SEGMENT);
    let remote = Arc::new(MockRemote::new(4 * SEGMENT as usize));
    let key = CacheKey::from_path("it/shared");
    let reader = Arc::new(CachedFileReader::new(
        cache.clone(),
        key,
        remote.clone() as Arc<dyn RemoteFileReader>,
    ));

    let span = 2 * SEGMENT;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reader = reader.clone();
            thread::spawn(move || reader.read(0, span).unwrap())
        })
        .collect();

    let expected = remote.expected(0, span as usize).to_vec();
    for handle in handles {
        assert_eq!(&handle.join().unwrap()[..], &expected[..]);
    }

    // Each of the two segments was downloaded exactly once; every other
    // reader waited and was served from the cache file.
    assert_eq!(remote.bytes_read(), span);
}

#[test]
fn concurrent_disjoint_files_and_ranges() {
    let dir = TempDir::new().unwrap();
    let cache = test_cache(&dir, 50_000_000, SEGMENT);

    let remotes: Vec<Arc<MockRemote>> = (0..4)
        .map(|i| Arc::new(MockRemote::new((i + 2) * SEGMENT as usize)))
        .collect();

    let handles: Vec<_> = remotes
        .iter()
        .enumerate()
        .map(|(i, remote)| {
            let reader = Arc::new(CachedFileReader::new(
                cache.clone(),
                CacheKey::from_path(&format!("it/file-{i}")),
                remote.clone() as Arc<dyn RemoteFileReader>,
            ));
            let remote = remote.clone();
            thread::spawn(move || {
                for pass in 0..3 {
                    let offset = (pass * 1000) as u64;
                    let len = SEGMENT + 123;
                    let data = reader.read(offset, len).unwrap();
                    assert_eq!(&data[..], remote.expected(offset, len as usize));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
