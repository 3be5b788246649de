//! Optional config file loading and the merged, immutable [Settings].
//!
//! Search order: ./qqcomic.toml, then $XDG_CONFIG_HOME/qqcomic/config.toml
//! (or ~/.config/qqcomic/config.toml).

use crate::resolver::api::{ApiResolver, DEFAULT_API_ENDPOINTS};
use crate::resolver::client::{CancelFlag, Fetcher, DEFAULT_MAX_ATTEMPTS};
use crate::resolver::error::ClientBuildError;
use crate::resolver::decoder::{default_hypotheses, Decoder, OffsetMode, DEFAULT_STRIP_EVERY};
use crate::resolver::headers::DEFAULT_USER_AGENT;
use crate::resolver::hosts::{HostAllowList, DEFAULT_IMAGE_HOSTS};
use crate::resolver::pipeline::{default_strategies, Pipeline};
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// HTTP User-Agent header, also reported in per-image headers.
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Number of HTTP attempts per request (default 3).
    pub retry_count: Option<u32>,
    /// Linear backoff unit in milliseconds; the n-th retry waits n times this.
    pub retry_base_delay_ms: Option<u64>,
    /// Positional offset formula tried first: modulo (default) or byte_mask.
    pub offset_mode: Option<OffsetMode>,
    /// N values for the strip-every-Nth decode hypothesis (default [2, 3, 4]).
    pub strip_every: Option<Vec<usize>>,
    /// Image host domains; subdomains are accepted.
    pub image_hosts: Option<Vec<String>>,
    /// API endpoint templates with {comic_id} and {chapter_id} placeholders.
    pub api_endpoints: Option<Vec<String>>,
    /// Try the API endpoints before fetching the chapter page (default true).
    pub use_api: Option<bool>,
}

impl Config {
    /// Keys set in `self` win; the rest come from `base`.
    pub fn overlay(self, base: Config) -> Config {
        Config {
            user_agent: self.user_agent.or(base.user_agent),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            retry_count: self.retry_count.or(base.retry_count),
            retry_base_delay_ms: self.retry_base_delay_ms.or(base.retry_base_delay_ms),
            offset_mode: self.offset_mode.or(base.offset_mode),
            strip_every: self.strip_every.or(base.strip_every),
            image_hosts: self.image_hosts.or(base.image_hosts),
            api_endpoints: self.api_endpoints.or(base.api_endpoints),
            use_api: self.use_api.or(base.use_api),
        }
    }
}

/// Search order: (1) ./qqcomic.toml, (2) $XDG_CONFIG_HOME/qqcomic/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("qqcomic.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("qqcomic").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config: Config = toml::from_str(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), "loaded config");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

/// Effective settings after folding config file and CLI flags over the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_base_delay: Duration,
    pub offset_mode: OffsetMode,
    pub strip_every: Vec<usize>,
    pub image_hosts: Vec<String>,
    pub api_endpoints: Vec<String>,
    pub use_api: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            offset_mode: OffsetMode::default(),
            strip_every: DEFAULT_STRIP_EVERY.to_vec(),
            image_hosts: DEFAULT_IMAGE_HOSTS.iter().map(|s| s.to_string()).collect(),
            api_endpoints: DEFAULT_API_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            use_api: true,
        }
    }
}

impl Settings {
    /// Validate and fill in defaults. Errors name the offending key.
    pub fn from_config(config: &Config) -> Result<Settings, String> {
        let defaults = Settings::default();
        let user_agent = match config.user_agent.as_deref().map(str::trim) {
            Some("") => return Err("Invalid user_agent: must not be empty".to_string()),
            Some(ua) => ua.to_string(),
            None => defaults.user_agent,
        };
        if HeaderValue::from_str(&user_agent).is_err() {
            return Err(
                "Invalid user_agent: must not contain line breaks or control characters"
                    .to_string(),
            );
        }
        let timeout_secs = config.timeout_secs.unwrap_or(defaults.timeout_secs);
        if timeout_secs == 0 {
            return Err("Invalid timeout_secs: must be at least 1".to_string());
        }
        let strip_every = config.strip_every.clone().unwrap_or(defaults.strip_every);
        if let Some(n) = strip_every.iter().find(|n| **n < 2) {
            return Err(format!("Invalid strip_every: {} (each N must be at least 2)", n));
        }
        let image_hosts = config.image_hosts.clone().unwrap_or(defaults.image_hosts);
        if HostAllowList::new(&image_hosts).domains().is_empty() {
            return Err("Invalid image_hosts: at least one domain is required".to_string());
        }
        let api_endpoints = config.api_endpoints.clone().unwrap_or(defaults.api_endpoints);
        if let Some(bad) = api_endpoints.iter().find(|t| !t.contains("{chapter_id}")) {
            return Err(format!(
                "Invalid api_endpoints entry '{}': missing {{chapter_id}} placeholder",
                bad
            ));
        }
        Ok(Settings {
            user_agent,
            timeout_secs,
            retry_count: config.retry_count.unwrap_or(defaults.retry_count).max(1),
            retry_base_delay: config
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            offset_mode: config.offset_mode.unwrap_or(defaults.offset_mode),
            strip_every,
            image_hosts,
            api_endpoints,
            use_api: config.use_api.unwrap_or(defaults.use_api),
        })
    }

    pub fn hosts(&self) -> HostAllowList {
        HostAllowList::new(&self.image_hosts)
    }

    pub fn decoder(&self) -> Decoder {
        Decoder::new(
            default_hypotheses(self.offset_mode, &self.strip_every),
            self.hosts(),
        )
    }

    pub fn fetcher(&self, cancel: Option<CancelFlag>) -> Result<Fetcher, ClientBuildError> {
        let mut builder = Fetcher::builder()
            .user_agent(self.user_agent.clone())
            .timeout_secs(self.timeout_secs)
            .max_attempts(self.retry_count)
            .base_delay(self.retry_base_delay);
        if let Some(cancel) = cancel {
            builder = builder.cancel_flag(cancel);
        }
        builder.build()
    }

    /// Pipeline over `fetcher` wired with these settings.
    pub fn pipeline(&self, fetcher: Fetcher) -> Pipeline {
        let hosts = self.hosts();
        let pipeline = Pipeline::new(fetcher, hosts.clone())
            .with_strategies(default_strategies(&hosts, self.decoder()))
            .with_user_agent(self.user_agent.clone());
        if self.use_api {
            pipeline.with_api(ApiResolver::new(self.api_endpoints.clone(), hosts))
        } else {
            pipeline.without_api()
        }
    }
}
