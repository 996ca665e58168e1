use crate::error::KeeperError;
use crate::spot::feed::{DEFAULT_FEED_URL, NO_MESSAGES_CODE, SpotFeedClient};
use crate::spot::gpx::DEFAULT_CREATOR;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("messages.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub feed_id: Option<String>,
    pub feed_password: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub max_pages: u32,
    pub quiet_codes: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_id: None,
            feed_password: None,
            base_url: DEFAULT_FEED_URL.to_string(),
            request_timeout_secs: 30,
            max_pages: 20,
            quiet_codes: vec![NO_MESSAGES_CODE.to_string()],
        }
    }
}

impl FeedConfig {
    pub fn client(&self) -> SpotFeedClient {
        SpotFeedClient {
            base_url: self.base_url.clone(),
            feed_password: self.feed_password.clone(),
            request_timeout_secs: self.request_timeout_secs,
            max_pages: self.max_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpxConfig {
    pub creator: String,
}

impl Default for GpxConfig {
    fn default() -> Self {
        Self {
            creator: DEFAULT_CREATOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeeperConfig {
    pub archive: ArchiveConfig,
    pub feed: FeedConfig,
    pub gpx: GpxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialKeeperConfig {
    archive: Option<ArchiveConfig>,
    feed: Option<FeedConfig>,
    gpx: Option<GpxConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        // Set but empty means "tolerate no codes".
        Ok(v) => split_csv(&v),
        Err(_) => fallback.to_vec(),
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(KeeperError::InvalidConfig(msg.to_string()).into())
}

pub fn validate(cfg: &KeeperConfig) -> Result<()> {
    if cfg.archive.path.as_os_str().is_empty() {
        return invalid("archive path cannot be empty");
    }
    if cfg.feed.base_url.trim().is_empty() {
        return invalid("feed base url cannot be empty");
    }
    if cfg.feed.request_timeout_secs == 0 {
        return invalid("feed request timeout must be >= 1 second");
    }
    if cfg.feed.max_pages == 0 {
        return invalid("feed max pages must be >= 1");
    }
    if cfg.gpx.creator.trim().is_empty() {
        return invalid("gpx creator cannot be empty");
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SPOTKEEPER_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let config_dir = dirs::config_dir()?;
    Some(config_dir.join("spotkeeper").join("spotkeeper.toml"))
}

fn merge_file_config(base: &mut KeeperConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path).map_err(|err| {
        KeeperError::InvalidConfig(format!("failed to read {}: {err}", path.display()))
    })?;
    let parsed: PartialKeeperConfig = toml::from_str(&raw).map_err(|err| {
        KeeperError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(feed) = parsed.feed {
        base.feed = feed;
    }
    if let Some(gpx) = parsed.gpx {
        base.gpx = gpx;
    }
    Ok(())
}

fn apply_env(cfg: &mut KeeperConfig) {
    if let Some(path) = env_or_optional("SPOTKEEPER_MESSAGES", None) {
        cfg.archive.path = PathBuf::from(path);
    }
    cfg.feed.feed_id = env_or_optional("SPOTKEEPER_FEED_ID", cfg.feed.feed_id.take());
    cfg.feed.feed_password =
        env_or_optional("SPOTKEEPER_FEED_PASSWORD", cfg.feed.feed_password.take());
    cfg.feed.base_url = env_or_string("SPOTKEEPER_FEED_URL", &cfg.feed.base_url);
    cfg.feed.request_timeout_secs = env_or_u64(
        "SPOTKEEPER_REQUEST_TIMEOUT_SECS",
        cfg.feed.request_timeout_secs,
    );
    cfg.feed.max_pages = env_or_u32("SPOTKEEPER_MAX_PAGES", cfg.feed.max_pages);
    cfg.feed.quiet_codes = env_or_csv("SPOTKEEPER_QUIET_CODES", &cfg.feed.quiet_codes);
    cfg.gpx.creator = env_or_string("SPOTKEEPER_GPX_CREATOR", &cfg.gpx.creator);
}

/// Defaults, then the config file, then `SPOTKEEPER_*` environment variables.
/// Command-line flags are applied on top by the caller.
pub fn load_config() -> Result<KeeperConfig> {
    let mut cfg = KeeperConfig::default();
    if let Some(path) = resolve_config_path() {
        merge_file_config(&mut cfg, &path)?;
    }
    apply_env(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
