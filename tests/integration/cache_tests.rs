use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use vidupe::cache::FingerprintCache;
use vidupe::fingerprint::{Fingerprint, Fingerprinter, SampleConfig};
use vidupe::scanner::FileIdentity;

use super::support::{mp4, write};

#[test]
fn test_real_fingerprints_survive_reopen() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("nested").join("fp.db");
    let path = write(videos.path(), "clip.mp4", &mp4(42_000, 1920, 1080, &[7; 2048]));
    let identity = FileIdentity::from_path(&path).unwrap();
    let fingerprint = Fingerprinter::default().fingerprint(&path).unwrap();

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        assert!(cache.is_empty());
        cache.store(identity.clone(), fingerprint.clone());
        assert_eq!(cache.flush().unwrap(), 1);
    }

    let cache = FingerprintCache::open(&cache_path).unwrap();
    assert_eq!(cache.path(), Some(cache_path.as_path()));
    let cached = cache.lookup(&identity).unwrap();
    assert_eq!(cached, fingerprint);
    assert_eq!(cached.duration_ms(), 42_000);
    assert_eq!((cached.width(), cached.height()), (1920, 1080));
}

#[test]
fn test_lookup_misses_after_content_change() {
    let videos = TempDir::new().unwrap();
    let path = write(videos.path(), "clip.mp4", &mp4(1_000, 640, 480, &[1; 128]));
    let before = FileIdentity::from_path(&path).unwrap();
    let cache = FingerprintCache::in_memory().unwrap();
    cache.store(before.clone(), Fingerprint::content_only([9; 32]));

    write(videos.path(), "clip.mp4", &mp4(1_000, 640, 480, &[1; 512]));
    let after = FileIdentity::from_path(&path).unwrap();

    assert_ne!(before.size, after.size);
    assert!(cache.lookup(&before).is_some());
    assert!(cache.lookup(&after).is_none());
    // The stale entry stays until it is overwritten.
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_store_and_lookup() {
    let cache = Arc::new(FingerprintCache::in_memory().unwrap());
    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50u8 {
                    let identity = FileIdentity::new(format!("/v/{t}/{i}.mp4").into(), u64::from(i), 0);
                    cache.store(identity.clone(), Fingerprint::content_only([t ^ i; 32]));
                    assert!(cache.lookup(&identity).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 400);
    assert_eq!(cache.flush().unwrap(), 400);
}

#[test]
fn test_prune_then_flush_bounds_store() {
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    let cache = FingerprintCache::open(&cache_path).unwrap();
    for i in 0..10u64 {
        cache.store(
            FileIdentity::new(format!("/v/{i}.mp4").into(), i, 0),
            Fingerprint::content_only([i as u8; 32]),
        );
    }

    let keep: HashSet<_> = cache.paths().into_iter().take(3).collect();
    assert_eq!(cache.prune(&keep), 7);
    cache.flush().unwrap();

    let reopened = FingerprintCache::open(&cache_path).unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.paths().into_iter().collect::<HashSet<_>>(), keep);
}

#[test]
fn test_sampling_parameters_change_content_hash() {
    let videos = TempDir::new().unwrap();
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let path = write(videos.path(), "big.mp4", &mp4(1_000, 640, 480, &body));

    let default_hash = Fingerprinter::default().content_hash(&path).unwrap();
    let small_hash = Fingerprinter::new(SampleConfig::new(2, 1024))
        .content_hash(&path)
        .unwrap();

    // Cached fingerprints from one configuration do not match the other.
    assert_ne!(default_hash, small_hash);
}
