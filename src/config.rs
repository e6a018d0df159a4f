//! Configuration management for Turnstile.
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML file,
//! `TURNSTILE__<SECTION>__<KEY>` environment variables, then the plain
//! variable names used by earlier deployments (`PORT`, `RATE_LIMIT_*`,
//! `REDIS_*`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Policy, StoreFallback, DEFAULT_KEY_PREFIX, DEFAULT_MAX_REQUESTS};
use crate::store::StoreBackend;

/// Prefix for structured environment overrides.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission policy configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Shared counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// Admission policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Fixed window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Trust `X-Forwarded-For` from an upstream proxy
    #[serde(default)]
    pub trust_proxy: bool,

    /// Namespace for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Behaviour when the store is unreachable; has no default
    #[serde(default)]
    pub store_fallback: Option<StoreFallback>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            trust_proxy: false,
            key_prefix: default_key_prefix(),
            store_fallback: None,
        }
    }
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Shared counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which store implementation to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Bound on connecting and on each round trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Refuse to start when the store is unreachable
    #[serde(default)]
    pub require_connection: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            timeout_ms: default_store_timeout_ms(),
            require_connection: false,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_store_timeout_ms() -> u64 {
    250
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, std::env::vars().collect())
    }

    /// Load configuration from an optional file and the given variables.
    pub fn load_from(path: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone().into_iter().collect())),
        );

        for (key, value) in legacy_overrides(&vars) {
            builder = builder.set_override(key, value)?;
        }

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// The validated admission policy.
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(
            Duration::from_millis(self.admission.window_ms),
            self.admission.max_requests,
            self.admission.key_prefix.clone(),
        )
    }

    /// The store fallback, which must be chosen explicitly.
    pub fn store_fallback(&self) -> Result<StoreFallback> {
        self.admission.store_fallback.ok_or_else(|| {
            TurnstileError::Config(
                "admission.store_fallback must be set to 'fail-open' or 'fail-closed'".to_string(),
            )
        })
    }

    /// Check everything that must hold before serving traffic.
    pub fn validate(&self) -> Result<()> {
        self.policy()?;
        self.store_fallback()?;
        if self.store.timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Map the plain variable names of earlier deployments onto config keys.
fn legacy_overrides(vars: &HashMap<String, String>) -> Vec<(&'static str, String)> {
    let mut overrides = Vec::new();

    if let Some(port) = vars.get("PORT") {
        overrides.push(("server.listen_addr", format!("0.0.0.0:{}", port.trim())));
    }
    if let Some(window) = vars.get("RATE_LIMIT_WINDOW_MS") {
        overrides.push(("admission.window_ms", window.trim().to_string()));
    }
    if let Some(max) = vars.get("RATE_LIMIT_MAX_REQUESTS") {
        overrides.push(("admission.max_requests", max.trim().to_string()));
    }

    let host = vars.get("REDIS_HOST");
    let port = vars.get("REDIS_PORT");
    let password = vars.get("REDIS_PASSWORD").filter(|p| !p.is_empty());
    if host.is_some() || port.is_some() || password.is_some() {
        let host = host.map(String::as_str).unwrap_or("localhost");
        let port = port.map(String::as_str).unwrap_or("6379");
        let url = match password {
            Some(password) => format!("redis://default:{}@{}:{}/", password, host, port),
            None => format!("redis://{}:{}/", host, port),
        };
        overrides.push(("store.url", url));
    }

    overrides
}
