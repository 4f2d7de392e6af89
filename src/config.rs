//! TOML configuration.
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000"
//!
//! [linking]
//! strategy = "poll"        # or "manual"
//! poll_interval_ms = 3000
//! max_poll_attempts = 20
//!
//! [browser]
//! enabled = true
//! # command = "firefox"
//! ```
//!
//! The base URL is the only setting that changes what the client talks to.
//! It can be overridden by `--base-url` or `ONESOURCE_BASE_URL`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted for the backend base URL.
pub const BASE_URL_ENV: &str = "ONESOURCE_BASE_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub linking: LinkingConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Poll,
    Manual,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinkingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl LinkingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_strategy() -> Strategy {
    Strategy::Poll
}
fn default_poll_interval_ms() -> u64 {
    3000
}
fn default_max_poll_attempts() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default = "default_browser_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

fn default_browser_enabled() -> bool {
    true
}

impl Config {
    /// Configuration with every default, pointed at `base_url`.
    pub fn minimal(base_url: &str) -> Self {
        Self {
            backend: BackendConfig {
                base_url: base_url.to_string(),
            },
            linking: LinkingConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let config = read_config(path)?;
    validate(&config)?;
    Ok(config)
}

/// Read and parse without validating, so overrides can still apply.
fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

/// Load the config file, applying the base-URL override chain.
///
/// `flag` wins over the environment, which wins over the file. A missing
/// file is tolerated only when an override supplies the base URL.
pub fn resolve_config(path: &Path, flag: Option<&str>) -> Result<Config> {
    let env = std::env::var(BASE_URL_ENV).ok().filter(|v| !v.trim().is_empty());
    resolve_with(path, flag, env.as_deref())
}

fn resolve_with(path: &Path, flag: Option<&str>, env: Option<&str>) -> Result<Config> {
    let override_url = flag.or(env);

    let mut config = if path.exists() {
        read_config(path)?
    } else {
        match override_url {
            Some(url) => Config::minimal(url),
            None => anyhow::bail!(
                "No config file at {} and no base URL given (use --base-url or {})",
                path.display(),
                BASE_URL_ENV
            ),
        }
    };

    if let Some(url) = override_url {
        config.backend.base_url = url.to_string();
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let parsed = reqwest::Url::parse(&config.backend.base_url)
        .with_context(|| format!("backend.base_url is not a URL: {}", config.backend.base_url))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("backend.base_url must be http or https, got '{}'", other),
    }

    if config.linking.poll_interval_ms == 0 {
        anyhow::bail!("linking.poll_interval_ms must be > 0");
    }
    if config.linking.max_poll_attempts < 1 {
        anyhow::bail!("linking.max_poll_attempts must be >= 1");
    }

    Ok(())
}
