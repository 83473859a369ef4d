//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are never stored in the TOML to avoid leaking secrets: the
//! GEMINI_API_KEYS env var (JSON-serialized list) takes precedence, then the
//! contents of `keys_file`, then the GEMINI_API_KEY env var (single key).

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Raw JSON-serialized key list, resolved from env or keys_file.
    /// Parsing (including quote tolerance and malformed-input fallback)
    /// is the pool's responsibility, not the config loader's.
    #[serde(skip)]
    pub key_list: Option<Secret<String>>,
    /// Single fallback key from GEMINI_API_KEY
    #[serde(skip)]
    pub single_key: Option<Secret<String>>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Key pool settings
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Quarantine duration for a failed key, in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Path to a file containing the JSON key list (alternative to the
    /// GEMINI_API_KEYS env var)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            keys_file: None,
        }
    }
}

fn default_upstream_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_cooldown() -> u64 {
    3600
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Key list resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. keys_file path from config
    ///
    /// GEMINI_API_KEY is read independently as the single-key fallback.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.pool.cooldown_secs == 0 {
            return Err(common::Error::Config(
                "cooldown_secs must be greater than 0".into(),
            ));
        }

        // Resolve the key list: env var takes precedence over the file
        if let Ok(list) = std::env::var("GEMINI_API_KEYS") {
            config.key_list = Some(Secret::new(list));
        } else if let Some(ref keys_file) = config.pool.keys_file {
            let list = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            let list = list.trim().to_owned();
            if !list.is_empty() {
                config.key_list = Some(Secret::new(list));
            }
        }

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.single_key = Some(Secret::new(key));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gemini-key-proxy.toml")
    }
}
