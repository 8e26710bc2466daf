use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tempfile::TempDir;
use vidupe::cache::FingerprintCache;
use vidupe::duplicates::{DuplicateFinder, FinderError};
use vidupe::error::ExitCode;
use vidupe::progress::ProgressCallback;
use vidupe::run_with_output;
use vidupe::signal::ShutdownHandler;

use super::support::{config, file_name, group_names, mp4, write};

fn run(config: vidupe::config::Config) -> (ExitCode, serde_json::Value) {
    let mut out = Vec::new();
    let code = run_with_output(config, &ShutdownHandler::new(), &mut out).unwrap();
    (code, serde_json::from_slice(&out).unwrap())
}

#[test]
fn test_identical_files_form_exact_group() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let data = mp4(120_000, 1920, 1080, &[0x11; 4096]);
    write(videos.path(), "a.mp4", &data);
    write(videos.path(), "b.mp4", &data);

    let (code, report) = run(config(videos.path(), &state.path().join("fp.db")));

    assert_eq!(code, ExitCode::Success);
    assert_eq!(group_names(&report), vec![vec!["a.mp4", "b.mp4"]]);
    let group = &report["groups"][0];
    assert_eq!(group["match_kind"], "exact");
    assert_eq!(file_name(group["keeper"].as_str().unwrap()), "a.mp4");
    assert_eq!(group["actions"][0]["action"], "delete");
    assert_eq!(file_name(group["actions"][0]["target"].as_str().unwrap()), "b.mp4");
    assert_eq!(report["summary"]["reclaimable_space"], data.len() as u64);
}

#[test]
fn test_reencode_within_tolerance_is_near_duplicate() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(videos.path(), "c.mp4", &mp4(60_000, 1280, 720, &[0x01; 2048]));
    write(videos.path(), "d.mp4", &mp4(60_300, 1280, 720, &[0x02; 3072]));

    let (code, report) = run(config(videos.path(), &state.path().join("fp.db")));

    assert_eq!(code, ExitCode::Success);
    assert_eq!(group_names(&report), vec![vec!["c.mp4", "d.mp4"]]);
    let group = &report["groups"][0];
    assert_eq!(group["match_kind"], "near_duplicate");
    assert!(group.get("hash").is_none());
    // Same resolution, so the larger file is kept.
    assert_eq!(file_name(group["keeper"].as_str().unwrap()), "d.mp4");
    assert_eq!(group["actions"][0]["action"], "merge");
}

#[test]
fn test_duration_outside_tolerance_is_not_grouped() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(videos.path(), "c.mp4", &mp4(60_000, 1280, 720, &[0x01; 2048]));
    write(videos.path(), "d.mp4", &mp4(61_000, 1280, 720, &[0x02; 2048]));

    let (code, report) = run(config(videos.path(), &state.path().join("fp.db")));

    assert_eq!(code, ExitCode::NoDuplicates);
    assert!(group_names(&report).is_empty());
}

#[test]
fn test_single_file_produces_no_groups() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    write(videos.path(), "only.mp4", &mp4(5_000, 640, 480, &[0x05; 512]));
    write(videos.path(), "notes.txt", b"not a video");

    let (code, report) = run(config(videos.path(), &state.path().join("fp.db")));

    assert_eq!(code, ExitCode::NoDuplicates);
    assert!(group_names(&report).is_empty());
    assert_eq!(report["summary"]["total_files"], 1);
    assert_eq!(report["summary"]["exit_code_name"], "VD002");
}

#[test]
fn test_changed_mtime_forces_refingerprint() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    let data = mp4(10_000, 1280, 720, &[0x33; 1024]);
    write(videos.path(), "a.mp4", &data);
    let touched = write(videos.path(), "b.mp4", &data);

    let (_, first) = run(config(videos.path(), &cache_path));
    assert_eq!(first["summary"]["cache_misses"], 2);
    assert_eq!(first["summary"]["cache_entries_written"], 2);

    let (_, second) = run(config(videos.path(), &cache_path));
    assert_eq!(second["summary"]["cache_hits"], 2);
    assert_eq!(second["summary"]["cache_misses"], 0);

    let later = SystemTime::now() + Duration::from_secs(3600);
    filetime::set_file_mtime(&touched, FileTime::from_system_time(later)).unwrap();

    let (code, third) = run(config(videos.path(), &cache_path));
    assert_eq!(code, ExitCode::Success);
    assert_eq!(third["summary"]["cache_hits"], 1);
    assert_eq!(third["summary"]["cache_misses"], 1);
    assert_eq!(group_names(&third), vec![vec!["a.mp4", "b.mp4"]]);
}

#[test]
fn test_corrupted_cache_still_completes_scan() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    fs::write(&cache_path, b"definitely not sqlite").unwrap();
    let data = mp4(8_000, 640, 360, &[0x44; 700]);
    write(videos.path(), "x.mp4", &data);
    write(videos.path(), "y.mp4", &data);

    let (code, report) = run(config(videos.path(), &cache_path));

    assert_eq!(code, ExitCode::Success);
    assert_eq!(report["summary"]["cache_hits"], 0);
    assert_eq!(report["summary"]["cache_misses"], 2);
    assert_eq!(group_names(&report).len(), 1);

    let reopened = FingerprintCache::open(&cache_path).unwrap();
    assert!(!reopened.recovered_from_corruption());
    assert_eq!(reopened.len(), 2);
}

#[test]
fn test_ignored_group_is_hidden_on_next_run() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    let data = mp4(30_000, 1280, 720, &[0x55; 900]);
    write(videos.path(), "one.mp4", &data);
    write(videos.path(), "two.mp4", &data);

    let (_, first) = run(config(videos.path(), &cache_path));
    let key = first["groups"][0]["key"].as_str().unwrap().to_string();

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        cache.ignore_group(key);
        cache.flush().unwrap();
    }

    // Renaming a member keeps the content-based key.
    fs::rename(videos.path().join("two.mp4"), videos.path().join("renamed.mp4")).unwrap();

    let (code, second) = run(config(videos.path(), &cache_path));
    assert_eq!(code, ExitCode::NoDuplicates);
    assert!(group_names(&second).is_empty());
    assert_eq!(second["summary"]["ignored_groups"], 1);
}

#[test]
fn test_deleted_files_are_pruned_from_cache() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    write(videos.path(), "keep.mp4", &mp4(1_000, 320, 240, &[1; 100]));
    let gone = write(videos.path(), "gone.mp4", &mp4(2_000, 320, 240, &[2; 100]));

    run(config(videos.path(), &cache_path));
    assert_eq!(FingerprintCache::open(&cache_path).unwrap().len(), 2);

    fs::remove_file(&gone).unwrap();
    run(config(videos.path(), &cache_path));

    let cache = FingerprintCache::open(&cache_path).unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.get(&gone).is_none());
}

#[test]
fn test_missing_root_is_an_error() {
    let state = TempDir::new().unwrap();
    let missing = state.path().join("nope");
    let mut out = Vec::new();

    let err = run_with_output(
        config(&missing, &state.path().join("fp.db")),
        &ShutdownHandler::new(),
        &mut out,
    )
    .unwrap_err();

    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{err:#}").contains("Path not found"));
    assert!(out.is_empty());
}

/// Requests shutdown as soon as the first file finishes.
struct StopAfterFirst {
    flag: Arc<AtomicBool>,
}

impl ProgressCallback for StopAfterFirst {
    fn on_phase_start(&self, _phase: &str, _total: usize) {}

    fn on_progress(&self, _current: usize, _path: &str) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn on_phase_end(&self, _phase: &str) {}
}

#[test]
fn test_interrupted_scan_flushes_computed_fingerprints() {
    let videos = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let cache_path = state.path().join("fp.db");
    for i in 0..6u8 {
        write(
            videos.path(),
            &format!("v{i}.mp4"),
            &mp4(1_000 * u32::from(i + 1), 640, 480, &[i; 256]),
        );
    }

    let flag = Arc::new(AtomicBool::new(false));
    let cache = Arc::new(FingerprintCache::open(&cache_path).unwrap());
    let finder = DuplicateFinder::new(
        vidupe::config::Config {
            workers: 1,
            ..vidupe::config::Config::default()
        }
        .finder_config()
        .with_cache(Arc::clone(&cache))
        .with_shutdown_flag(Arc::clone(&flag))
        .with_progress_callback(Arc::new(StopAfterFirst {
            flag: Arc::clone(&flag),
        })),
    );

    let result = finder.find_duplicates_in_paths(&[videos.path().to_path_buf()]);
    assert!(matches!(result, Err(FinderError::Interrupted)));
    drop(finder);
    drop(cache);

    let persisted = FingerprintCache::open(&cache_path).unwrap().len();
    assert!(persisted >= 1, "computed fingerprints were not flushed");
    assert!(persisted < 6, "shutdown did not stop the batch");
}
