// src/config/bot.rs
//! Startup configuration. Built once, then handed to the poll loop by value;
//! nothing reads ambient state during a cycle.
//!
//! Precedence (lowest first): defaults, TOML file, environment.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::DEFAULT_STATE_PATH;
use crate::ingest::filters::FilterConfig;
use crate::ingest::providers::gamma::DEFAULT_API_BASE;
use crate::notify::message::{MessageTemplate, DEFAULT_EVENT_URL_BASE};
use crate::notify::OAuthCredentials;

pub const ENV_BOT_CONFIG_PATH: &str = "BOT_CONFIG_PATH";
pub const DEFAULT_BOT_CONFIG_PATH: &str = "config/bot.toml";
pub const ENV_ALLOWED_TAGS_PATH: &str = "ALLOWED_TAGS_PATH";
/// Tag files looked up when `ALLOWED_TAGS_PATH` is unset, first hit wins.
pub const DEFAULT_ALLOWED_TAGS_PATHS: [&str; 2] =
    ["config/allowed_tags.toml", "config/allowed_tags.json"];

pub const MAX_PAGE_SIZE: usize = 500;

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_page_size() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_event_url_base() -> String {
    DEFAULT_EVENT_URL_BASE.to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_backoff_secs() -> u64 {
    900
}
fn default_max_backoff_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub min_liquidity: f64,
    #[serde(default)]
    pub min_volume: f64,
    #[serde(default)]
    pub allowed_tags: BTreeSet<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_true")]
    pub include_images: bool,
    #[serde(default = "default_true")]
    pub exclude_sports: bool,
    #[serde(default = "default_true")]
    pub exclude_up_or_down: bool,
    #[serde(default = "default_true")]
    pub skip_expired: bool,
    #[serde(default)]
    pub max_age_minutes: u64,
    /// Opt-in: mark the first page seen without posting when no checkpoint exists.
    #[serde(default)]
    pub skip_backlog_on_first_run: bool,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_event_url_base")]
    pub event_url_base: String,
    #[serde(default)]
    pub message_footer: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Only ever taken from the environment.
    #[serde(skip)]
    pub credentials: Option<OAuthCredentials>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            min_liquidity: 0.0,
            min_volume: 0.0,
            allowed_tags: BTreeSet::new(),
            page_size: default_page_size(),
            include_images: true,
            exclude_sports: true,
            exclude_up_or_down: true,
            skip_expired: true,
            max_age_minutes: 0,
            skip_backlog_on_first_run: false,
            state_path: default_state_path(),
            api_base: default_api_base(),
            event_url_base: default_event_url_base(),
            message_footer: None,
            http_timeout_secs: default_http_timeout_secs(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            credentials: None,
        }
    }
}

impl BotConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: BotConfig = toml::from_str(s).context("parsing bot config TOML")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading bot config at {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// Full startup resolution:
    /// 1) $BOT_CONFIG_PATH (must exist) or `config/bot.toml` if present
    /// 2) environment overrides
    /// 3) allowed-tags file ($ALLOWED_TAGS_PATH or config/allowed_tags.*), merged
    /// 4) X credentials
    pub fn from_env() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_BOT_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("BOT_CONFIG_PATH points to non-existent path"));
                }
                Self::load_from_file(&pb)?
            }
            Err(_) => {
                let p = PathBuf::from(DEFAULT_BOT_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };

        let get = |k: &str| std::env::var(k).ok();
        cfg.apply_env_from(get)?;
        if let Some(path) = Self::allowed_tags_file()? {
            cfg.allowed_tags.extend(Self::read_tag_file(&path)?);
        }
        cfg.credentials = credentials_from(get);
        cfg.sanitize();
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (the process env in production).
    pub fn apply_env_from<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_num("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("MIN_LIQUIDITY") {
            self.min_liquidity = parse_num("MIN_LIQUIDITY", &v)?;
        }
        if let Some(v) = get("MIN_VOLUME") {
            self.min_volume = parse_num("MIN_VOLUME", &v)?;
        }
        if let Some(v) = get("ALLOWED_TAGS") {
            self.allowed_tags = normalize_tags(v.split(','));
        }
        if let Some(v) = get("PAGE_SIZE") {
            self.page_size = parse_num("PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("INCLUDE_IMAGES") {
            self.include_images = parse_bool("INCLUDE_IMAGES", &v)?;
        }
        if let Some(v) = get("EXCLUDE_SPORTS") {
            self.exclude_sports = parse_bool("EXCLUDE_SPORTS", &v)?;
        }
        if let Some(v) = get("EXCLUDE_UP_OR_DOWN") {
            self.exclude_up_or_down = parse_bool("EXCLUDE_UP_OR_DOWN", &v)?;
        }
        if let Some(v) = get("SKIP_EXPIRED") {
            self.skip_expired = parse_bool("SKIP_EXPIRED", &v)?;
        }
        if let Some(v) = get("MAX_AGE_MINUTES") {
            self.max_age_minutes = parse_num("MAX_AGE_MINUTES", &v)?;
        }
        if let Some(v) = get("SKIP_BACKLOG_ON_FIRST_RUN") {
            self.skip_backlog_on_first_run = parse_bool("SKIP_BACKLOG_ON_FIRST_RUN", &v)?;
        }
        if let Some(v) = get("STATE_PATH") {
            self.state_path = PathBuf::from(v);
        }
        if let Some(v) = get("GAMMA_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = get("EVENT_URL_BASE") {
            self.event_url_base = v;
        }
        if let Some(v) = get("MESSAGE_FOOTER") {
            self.message_footer = Some(v);
        }
        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_num("HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_BACKOFF_SECS") {
            self.rate_limit_backoff_secs = parse_num("RATE_LIMIT_BACKOFF_SECS", &v)?;
        }
        if let Some(v) = get("MAX_BACKOFF_SECS") {
            self.max_backoff_secs = parse_num("MAX_BACKOFF_SECS", &v)?;
        }
        Ok(())
    }

    /// Clamp odd values into something the loop can run with.
    pub fn sanitize(&mut self) {
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        if !self.min_liquidity.is_finite() || self.min_liquidity < 0.0 {
            self.min_liquidity = 0.0;
        }
        if !self.min_volume.is_finite() || self.min_volume < 0.0 {
            self.min_volume = 0.0;
        }
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self.max_backoff_secs = self.max_backoff_secs.max(self.poll_interval_secs);
        self.allowed_tags = normalize_tags(&self.allowed_tags);
    }

    /// Where the allowed-tags file lives: `$ALLOWED_TAGS_PATH` (must exist),
    /// else the first of [`DEFAULT_ALLOWED_TAGS_PATHS`] present, else none.
    pub fn allowed_tags_file() -> Result<Option<PathBuf>> {
        if let Ok(p) = std::env::var(ENV_ALLOWED_TAGS_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("ALLOWED_TAGS_PATH points to non-existent path"));
            }
            return Ok(Some(pb));
        }
        Ok(DEFAULT_ALLOWED_TAGS_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists()))
    }

    /// Read a tag file. The extension decides the format:
    /// `.toml` holds `tags = [..]`, `.json` holds `[..]` or `{"tags": [..]}`.
    pub fn read_tag_file(path: &Path) -> Result<BTreeSet<String>> {
        #[derive(Deserialize)]
        struct TagTable {
            tags: Vec<String>,
        }
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum JsonTags {
            List(Vec<String>),
            Table(TagTable),
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading allowed tags at {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let tags = match ext.as_deref() {
            Some("toml") => {
                toml::from_str::<TagTable>(&data)
                    .with_context(|| format!("parsing {}", path.display()))?
                    .tags
            }
            Some("json") => match serde_json::from_str::<JsonTags>(&data)
                .with_context(|| format!("parsing {}", path.display()))?
            {
                JsonTags::List(tags) | JsonTags::Table(TagTable { tags }) => tags,
            },
            _ => {
                return Err(anyhow!(
                    "allowed tags file {} must end in .toml or .json",
                    path.display()
                ))
            }
        };
        Ok(normalize_tags(&tags))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn filters(&self) -> FilterConfig {
        FilterConfig {
            min_liquidity: self.min_liquidity,
            min_volume: self.min_volume,
            allowed_tags: self.allowed_tags.clone(),
            exclude_sports: self.exclude_sports,
            exclude_up_or_down: self.exclude_up_or_down,
            skip_expired: self.skip_expired,
            max_age_minutes: self.max_age_minutes,
        }
    }

    pub fn template(&self) -> MessageTemplate {
        MessageTemplate {
            event_url_base: self.event_url_base.clone(),
            footer: self.message_footer.clone(),
        }
    }

    /// Tag set to push down to the fetcher, if any.
    pub fn fetch_tags(&self) -> Option<&BTreeSet<String>> {
        (!self.allowed_tags.is_empty()).then_some(&self.allowed_tags)
    }
}

/// All four X credentials, or none.
pub fn credentials_from<F>(get: F) -> Option<OAuthCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    Some(OAuthCredentials {
        consumer_key: read("X_API_KEY")?,
        consumer_secret: read("X_API_SECRET")?,
        access_token: read("X_ACCESS_TOKEN")?,
        access_secret: read("X_ACCESS_SECRET")?,
    })
}

/// Tag slugs match case-insensitively; blanks are dropped.
fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| anyhow!("invalid value for {key}: {raw:?}"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("invalid boolean for {key}: {raw:?}")),
    }
}
