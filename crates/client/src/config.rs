//! Client configuration.
//!
//! Built explicitly and handed to the coordinator; nothing reads the
//! environment after start-up.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("could not resolve an application data directory for local storage")]
    NoDataDir,
}

/// Backend address, storage namespace and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base address, without a trailing slash.
    pub base_url: String,
    /// Prefix for every cache/queue key, so several installs can share a database.
    pub namespace: String,
    /// Upper bound for every backend call; exceeding it counts as offline.
    pub request_timeout: Duration,
    /// SQLite file for durable storage; `None` uses the OS data directory.
    pub storage_path: Option<PathBuf>,
    pub auth_token: Option<String>,
    /// JSON key holding the server-assigned identifier.
    pub id_field: String,
    /// How often the connectivity probe pings the backend.
    pub probe_interval: Duration,
}

impl ClientConfig {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:8080/api";
    pub const DEFAULT_NAMESPACE: &'static str = "millstock";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: Self::DEFAULT_NAMESPACE.to_string(),
            request_timeout: Self::DEFAULT_TIMEOUT,
            storage_path: None,
            auth_token: None,
            id_field: "id".to_string(),
            probe_interval: Self::DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Read `MILLSTOCK_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("MILLSTOCK_API_URL").unwrap_or_else(|| {
            tracing::warn!(
                "MILLSTOCK_API_URL not set; using development default {}",
                Self::DEFAULT_BASE_URL
            );
            Self::DEFAULT_BASE_URL.to_string()
        });
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "MILLSTOCK_API_URL",
                reason: format!("'{base_url}' is not an http(s) URL"),
            });
        }

        let mut config = Self::new(base_url);

        if let Some(ns) = lookup("MILLSTOCK_NAMESPACE") {
            if ns.trim().is_empty() || ns.contains(':') {
                return Err(ConfigError::Invalid {
                    var: "MILLSTOCK_NAMESPACE",
                    reason: "must be non-empty and must not contain ':'".to_string(),
                });
            }
            config.namespace = ns;
        }
        if let Some(secs) = lookup("MILLSTOCK_TIMEOUT_SECS") {
            config.request_timeout = parse_secs("MILLSTOCK_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = lookup("MILLSTOCK_PROBE_SECS") {
            config.probe_interval = parse_secs("MILLSTOCK_PROBE_SECS", &secs)?;
        }
        if let Some(path) = lookup("MILLSTOCK_DB_PATH") {
            config.storage_path = Some(PathBuf::from(path));
        }
        if let Some(token) = lookup("MILLSTOCK_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Some(field) = lookup("MILLSTOCK_ID_FIELD") {
            config.id_field = field;
        }

        Ok(config)
    }

    /// Resolve the SQLite file: `storage_path`, or
    /// `{app_data_dir}/millstock/{namespace}.db`.
    pub fn resolved_storage_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.storage_path {
            return Ok(path.clone());
        }
        let mut dir = dirs::data_dir()
            .or_else(|| {
                dirs::home_dir().map(|mut h| {
                    h.push(".local");
                    h.push("share");
                    h
                })
            })
            .ok_or(ConfigError::NoDataDir)?;
        dir.push("millstock");
        dir.push(format!("{}.db", self.namespace));
        Ok(dir)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}

fn parse_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        reason: format!("'{raw}' is not a whole number of seconds"),
    })?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
