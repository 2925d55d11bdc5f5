//! Application configuration.
//!
//! Configuration is environment-driven: an optional TOML file merged with
//! `POSTBOX_`-prefixed environment variables, plus the short un-prefixed
//! keys (`LISTEN`, `BASE_URL`, `STORAGE`, ...) recognized for operational
//! convenience. Handlers read an immutable snapshot captured at request
//! entry; SIGHUP swaps the snapshot without interrupting connections.

use crate::error::{Error, Result};
use crate::iri::Iri;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The short environment keys recognized without the `POSTBOX_` prefix.
const PLAIN_ENV_KEYS: &[&str] = &[
    "LISTEN",
    "BASE_URL",
    "STORAGE",
    "STORAGE_PATH",
    "HTTPS",
    "CERT_PATH",
    "KEY_PATH",
    "TIME_OUT",
    "LOG_LEVEL",
    "MASTODON_COMPATIBLE",
    "REQUEST_CACHE",
    "FRONTEND_URL",
];

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bind address, an absolute socket path, or the literal `systemd`.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Public origin of the instance (required, no default).
    pub base_url: String,

    /// Storage backend selector.
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Backend root directory.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Name of the root bucket in the KV backend.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Serve TLS. Cleared at startup when no certificate pair is configured.
    #[serde(default)]
    pub https: bool,

    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Graceful shutdown budget, in seconds.
    #[serde(default = "default_time_out")]
    pub time_out: u64,

    /// One of `trace|debug|info|warn|error`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Generate RSA actor keys instead of Ed25519.
    #[serde(default)]
    pub mastodon_compatible: bool,

    /// Enable the per-IRI request cache.
    #[serde(default)]
    pub request_cache: bool,

    /// External presentation layer; `text/html` requests redirect here.
    #[serde(default)]
    pub frontend_url: Option<String>,
}

fn default_listen() -> String {
    "127.0.0.1:4000".to_string()
}

fn default_storage() -> String {
    "sled".to_string()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_storage_root() -> String {
    ":".to_string()
}

fn default_time_out() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load from an optional TOML file plus the environment.
    ///
    /// Later sources win: file, then `POSTBOX_*`, then the plain keys.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }
        let config: AppConfig = figment
            .merge(Env::prefixed("POSTBOX_"))
            .merge(Env::raw().filter(|key| {
                PLAIN_ENV_KEYS
                    .iter()
                    .any(|k| key.as_str().eq_ignore_ascii_case(k))
            }))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("BASE_URL must not be empty".to_string()));
        }
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid BASE_URL: {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::Config("BASE_URL must carry a host".to_string()));
        }
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Config(format!(
                "unknown LOG_LEVEL '{}'",
                self.log_level
            )));
        }
        if self.time_out == 0 {
            return Err(Error::Config("TIME_OUT must be at least 1 second".to_string()));
        }
        Ok(())
    }

    /// The base IRI of the instance, with any trailing slash removed.
    pub fn base_iri(&self) -> Iri {
        Iri::new(self.base_url.trim_end_matches('/'))
    }

    /// The shutdown budget as a [`Duration`].
    pub fn time_out(&self) -> Duration {
        Duration::from_secs(self.time_out)
    }

    /// Whether TLS is usable: `https` with both certificate paths present.
    pub fn tls_ready(&self) -> bool {
        self.https && self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Create a test configuration rooted at a scratch directory.
    ///
    /// **For testing only.**
    pub fn for_testing(storage_path: impl Into<PathBuf>) -> Self {
        AppConfig {
            listen: default_listen(),
            base_url: "https://postbox.test".to_string(),
            storage: default_storage(),
            storage_path: storage_path.into(),
            storage_root: default_storage_root(),
            https: false,
            cert_path: None,
            key_path: None,
            time_out: default_time_out(),
            log_level: "debug".to_string(),
            mastodon_compatible: false,
            request_cache: true,
            frontend_url: None,
        }
    }
}
