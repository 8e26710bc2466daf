use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use tempfile::tempdir;
use vidupe::config::{Config, ConfigError};

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("VIDUPE_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.cache_path, None);
    assert_eq!(config.cache_max_age_days, None);
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
near_duplicate_tolerance_ms = 250
workers = 3
sample_segments = 4
cache_path = "/var/cache/vidupe/fp.db"
cache_max_age_days = 30
video_extensions = ["mp4", "MKV"]
ignore_patterns = ["*.part"]
roots = ["/srv/videos"]
"#,
    )
    .unwrap();

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&config_path));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.near_duplicate_tolerance_ms, 250);
    assert_eq!(config.workers, 3);
    assert_eq!(config.sample_segments, 4);
    assert_eq!(config.segment_size, 65536);
    assert_eq!(config.cache_path, Some(PathBuf::from("/var/cache/vidupe/fp.db")));
    assert_eq!(config.cache_max_age_days, Some(30));
    assert_eq!(config.roots, vec![PathBuf::from("/srv/videos")]);
    assert_eq!(config.walker_config().extensions, vec!["mkv", "mp4"]);
    assert_eq!(config.walker_config().ignore_patterns, vec!["*.part"]);
}

#[test]
fn test_env_overrides_file() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "workers = 3\nquiet = false\n").unwrap();

    std::env::set_var("VIDUPE_WORKERS", "12");
    std::env::set_var("VIDUPE_QUIET", "true");
    std::env::set_var("VIDUPE_USE_CACHE", "false");

    let config = Config::load_from(Some(&config_path)).unwrap();
    clear_env();

    assert_eq!(config.workers, 12);
    assert!(config.quiet);
    assert!(!config.use_cache);
    assert_eq!(config.resolved_cache_path(), None);
}

#[test]
fn test_missing_file_uses_defaults() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let temp_dir = tempdir().unwrap();

    let config = Config::load_from(Some(&temp_dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_wrong_type_is_a_load_error() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    std::env::set_var("VIDUPE_WORKERS", "many");

    let result = Config::load_from(None);
    clear_env();

    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn test_save_and_reload() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nested").join("config.toml");
    let config = Config {
        workers: 5,
        cache_max_age_days: Some(7),
        roots: vec![PathBuf::from("/media/a"), PathBuf::from("/media/b")],
        ..Config::default()
    };

    config.save(&config_path).unwrap();
    let reloaded = Config::load_from(Some(&config_path)).unwrap();

    assert_eq!(reloaded, config);
}

#[test]
fn test_loaded_values_are_validated_separately() {
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Serialized::default("sample_segments", 1));
    let config: Config = figment.extract().unwrap();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "sample_segments",
            ..
        })
    ));
}

#[test]
fn test_env_prefix_split() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    std::env::set_var("VIDUPE_NEAR_DUPLICATE_TOLERANCE_MS", "900");

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Env::prefixed("VIDUPE_").split("__"));
    let config: Config = figment.extract().unwrap();
    clear_env();

    assert_eq!(config.near_duplicate_tolerance_ms, 900);
}
