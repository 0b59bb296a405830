use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{DEFAULT_CATALOG_URL, DEFAULT_PER_PAGE};
use crate::media::DEFAULT_FILE_TYPE;
use crate::viewport::DEFAULT_VISIBILITY_THRESHOLD;

const DEFAULT_ENV_PREFIX: &str = "CLIP_FEED";
const API_KEY_ENV: &str = "PEXELS_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            per_page: default_per_page(),
            user_agent: String::new(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// Force-pause after this much playback (e.g. `8s`). Unset or `0s` plays
    /// clips to the end; a later layer can switch it off again with `0s`.
    #[serde(default, with = "humantime_serde")]
    pub auto_pause_after: Option<Duration>,
    #[serde(default = "default_file_type")]
    pub supported_file_type: String,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,
    #[serde(default = "default_prefetch_distance")]
    pub prefetch_distance: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            auto_pause_after: None,
            supported_file_type: default_file_type(),
            visibility_threshold: default_visibility_threshold(),
            window_radius: default_window_radius(),
            prefetch_distance: default_prefetch_distance(),
        }
    }
}

fn default_file_type() -> String {
    DEFAULT_FILE_TYPE.to_string()
}

fn default_visibility_threshold() -> f64 {
    DEFAULT_VISIBILITY_THRESHOLD
}

fn default_window_radius() -> usize {
    2
}

fn default_prefetch_distance() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            mpv_path: default_mpv_path(),
            extra_args: Vec::new(),
        }
    }
}

fn default_mpv_path() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "warn".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    if cfg.catalog.api_key.trim().is_empty() {
        if let Ok(key) = env::var(API_KEY_ENV) {
            cfg.catalog.api_key = key.trim().to_string();
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    // Zero is how a layer turns the threshold back off.
    if cfg.playback.auto_pause_after.is_some_and(|after| after.is_zero()) {
        cfg.playback.auto_pause_after = None;
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Overlays every field of `other` that differs from the default.
fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.catalog.api_key.is_empty() {
        base.catalog.api_key = other.catalog.api_key;
    }
    if other.catalog.base_url != defaults.catalog.base_url {
        base.catalog.base_url = other.catalog.base_url;
    }
    if other.catalog.per_page != 0 && other.catalog.per_page != defaults.catalog.per_page {
        base.catalog.per_page = other.catalog.per_page;
    }
    if !other.catalog.user_agent.is_empty() {
        base.catalog.user_agent = other.catalog.user_agent;
    }
    if other.catalog.timeout != defaults.catalog.timeout {
        base.catalog.timeout = other.catalog.timeout;
    }

    if other.playback.auto_pause_after.is_some() {
        base.playback.auto_pause_after = other.playback.auto_pause_after;
    }
    if other.playback.supported_file_type != defaults.playback.supported_file_type {
        base.playback.supported_file_type = other.playback.supported_file_type;
    }
    if other.playback.visibility_threshold != defaults.playback.visibility_threshold {
        base.playback.visibility_threshold = other.playback.visibility_threshold;
    }
    if other.playback.window_radius != defaults.playback.window_radius {
        base.playback.window_radius = other.playback.window_radius;
    }
    if other.playback.prefetch_distance != defaults.playback.prefetch_distance {
        base.playback.prefetch_distance = other.playback.prefetch_distance;
    }

    if other.player.mpv_path != defaults.player.mpv_path {
        base.player.mpv_path = other.player.mpv_path;
    }
    if !other.player.extra_args.is_empty() {
        base.player.extra_args = other.player.extra_args;
    }

    if other.log.level != defaults.log.level {
        base.log.level = other.log.level;
    }
    if other.log.file.is_some() {
        base.log.file = other.log.file;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "catalog.api_key" => cfg.catalog.api_key = value.trim().to_string(),
        "catalog.base_url" => cfg.catalog.base_url = value,
        "catalog.user_agent" => cfg.catalog.user_agent = value,
        "catalog.per_page" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.catalog.per_page = parsed;
            }
        }
        "catalog.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.catalog.timeout = duration;
            }
        }
        "playback.auto_pause_after" => {
            if let Some(duration) = parse_auto_pause(&value) {
                cfg.playback.auto_pause_after = Some(duration);
            }
        }
        "playback.supported_file_type" => cfg.playback.supported_file_type = value,
        "playback.visibility_threshold" => {
            if let Ok(parsed) = value.parse::<f64>() {
                cfg.playback.visibility_threshold = parsed;
            }
        }
        "playback.window_radius" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.playback.window_radius = parsed;
            }
        }
        "playback.prefetch_distance" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.playback.prefetch_distance = parsed;
            }
        }
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.extra_args" => {
            cfg.player.extra_args = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

/// `off` and friends map to zero, which disables the threshold.
fn parse_auto_pause(value: &str) -> Option<Duration> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "off" | "none" | "disabled" | "false" | "0" => Some(Duration::ZERO),
        _ => humantime::parse_duration(value).ok(),
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clip-feed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("CLIP_FEED_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.catalog.per_page, 50);
        assert_eq!(cfg.catalog.base_url, DEFAULT_CATALOG_URL);
        assert_eq!(cfg.playback.auto_pause_after, None);
        assert_eq!(cfg.playback.window_radius, 2);
    }

    #[test]
    fn reads_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "catalog:\n  api_key: secret\n  per_page: 20\nplayback:\n  auto_pause_after: 8s\nplayer:\n  extra_args: [\"--mute=yes\"]\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("CLIP_FEED_TEST_YAML".into()),
        })
        .unwrap();
        assert_eq!(cfg.catalog.api_key, "secret");
        assert_eq!(cfg.catalog.per_page, 20);
        assert_eq!(cfg.catalog.timeout, Duration::from_secs(20));
        assert_eq!(cfg.playback.auto_pause_after, Some(Duration::from_secs(8)));
        assert_eq!(cfg.player.extra_args, vec!["--mute=yes".to_string()]);
        assert_eq!(cfg.player.mpv_path, "mpv");
    }

    #[test]
    fn rejects_malformed_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "catalog: [unterminated").unwrap();
        assert!(load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("CLIP_FEED_TEST_BAD".into()),
        })
        .is_err());
    }

    #[test]
    fn env_overrides() {
        env::set_var("CLIP_FEED_TEST_ENV_PLAYBACK__AUTO_PAUSE_AFTER", "8s");
        env::set_var("CLIP_FEED_TEST_ENV_CATALOG__PER_PAGE", "30");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("CLIP_FEED_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.playback.auto_pause_after, Some(Duration::from_secs(8)));
        assert_eq!(cfg.catalog.per_page, 30);
        env::remove_var("CLIP_FEED_TEST_ENV_PLAYBACK__AUTO_PAUSE_AFTER");
        env::remove_var("CLIP_FEED_TEST_ENV_CATALOG__PER_PAGE");
    }

    #[test]
    fn env_can_switch_auto_pause_off() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "playback:\n  auto_pause_after: 8s\n").unwrap();

        env::set_var("CLIP_FEED_TEST_OFF_PLAYBACK__AUTO_PAUSE_AFTER", "off");
        let cfg = load(LoadOptions {
            config_file: Some(path.clone()),
            env_prefix: Some("CLIP_FEED_TEST_OFF".into()),
        })
        .unwrap();
        env::remove_var("CLIP_FEED_TEST_OFF_PLAYBACK__AUTO_PAUSE_AFTER");
        assert_eq!(cfg.playback.auto_pause_after, None);

        env::set_var("CLIP_FEED_TEST_ZERO_PLAYBACK__AUTO_PAUSE_AFTER", "0s");
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("CLIP_FEED_TEST_ZERO".into()),
        })
        .unwrap();
        env::remove_var("CLIP_FEED_TEST_ZERO_PLAYBACK__AUTO_PAUSE_AFTER");
        assert_eq!(cfg.playback.auto_pause_after, None);
    }

    #[test]
    fn auto_pause_values() {
        assert_eq!(parse_auto_pause("8s"), Some(Duration::from_secs(8)));
        assert_eq!(parse_auto_pause(" OFF "), Some(Duration::ZERO));
        assert_eq!(parse_auto_pause("none"), Some(Duration::ZERO));
        assert_eq!(parse_auto_pause("soon"), None);
    }
}
