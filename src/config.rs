//! Runtime configuration for the data-access layer
//!
//! Holds per-domain cache TTLs, upstream timeouts, the query debounce window
//! and the generative-text API credentials. Values default to the constants
//! below and can be overridden from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default model used for the generative-text API
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";

/// Errors that can occur when reading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but empty or unusable
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Cache lifetimes for each logical data domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTtls {
    /// Publication searches and details
    pub publications: Duration,
    /// Knowledge gap listings
    pub knowledge_gaps: Duration,
    /// Data integration status
    pub data_integrations: Duration,
    /// Quote of the moment
    pub quotes: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            publications: Duration::from_secs(5 * 60),       // 5 minutes
            knowledge_gaps: Duration::from_secs(30 * 60),    // 30 minutes
            data_integrations: Duration::from_secs(60 * 60), // 1 hour
            quotes: Duration::from_secs(10 * 60),            // 10 minutes
        }
    }
}

/// Configuration for the whole data layer
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the generative-text service; `None` keeps every query on local data
    pub gemini_api_key: Option<String>,
    /// Model name for the generative-text service
    pub gemini_model: String,
    /// Upper bound for any primary source call
    pub request_timeout: Duration,
    /// Upper bound for availability probes
    pub probe_timeout: Duration,
    /// Quiescence window before a query is issued
    pub debounce: Duration,
    /// Per-domain cache lifetimes
    pub ttls: CacheTtls,
    /// Number of publications requested per search
    pub publication_limit: usize,
    /// Number of chat messages sent as context
    pub max_chat_history: usize,
    /// Override for the durable storage directory
    pub data_dir: Option<PathBuf>,
    /// Serve every domain from the offline catalogue without touching the network
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            debounce: Duration::from_millis(300),
            ttls: CacheTtls::default(),
            publication_limit: 20,
            max_chat_history: 10,
            data_dir: None,
            offline: false,
        }
    }
}

impl Config {
    /// Builds a configuration from the process environment
    ///
    /// Reads `GEMINI_API_KEY`, `GEMINI_MODEL`, `SPACEBIO_DATA_DIR` and
    /// `SPACEBIO_OFFLINE`.
    /// Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        config.gemini_api_key = lookup("GEMINI_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if let Some(model) = lookup("GEMINI_MODEL") {
            let model = model.trim();
            if model.is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "GEMINI_MODEL",
                    reason: "must not be empty".to_string(),
                });
            }
            config.gemini_model = model.to_string();
        }

        if let Some(dir) = lookup("SPACEBIO_DATA_DIR") {
            if dir.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: "SPACEBIO_DATA_DIR",
                    reason: "must not be empty".to_string(),
                });
            }
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(flag) = lookup("SPACEBIO_OFFLINE") {
            config.offline = parse_flag(&flag).ok_or_else(|| ConfigError::InvalidValue {
                name: "SPACEBIO_OFFLINE",
                reason: format!("expected a boolean, got '{}'", flag),
            })?;
        }

        Ok(config)
    }

    /// Configuration that never touches the network
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Whether the live generative-text source can be used at all
    pub fn has_gemini_key(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_ttls_per_domain() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.publications, Duration::from_secs(300));
        assert_eq!(ttls.knowledge_gaps, Duration::from_secs(1800));
        assert_eq!(ttls.data_integrations, Duration::from_secs(3600));
    }

    #[test]
    fn test_default_timeouts_and_debounce() {
        let config = Config::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert!(!config.has_gemini_key());
    }

    #[test]
    fn test_from_lookup_reads_key_and_model() {
        let config = Config::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", " secret "),
            ("GEMINI_MODEL", "gemini-pro"),
        ]))
        .unwrap();

        assert_eq!(config.gemini_api_key.as_deref(), Some("secret"));
        assert_eq!(config.gemini_model, "gemini-pro");
        assert!(config.has_gemini_key());
    }

    #[test]
    fn test_blank_api_key_is_treated_as_missing() {
        let config = Config::from_lookup(lookup_from(&[("GEMINI_API_KEY", "   ")])).unwrap();
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn test_empty_model_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[("GEMINI_MODEL", "")]));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("GEMINI_MODEL"));
    }

    #[test]
    fn test_data_dir_override() {
        let config =
            Config::from_lookup(lookup_from(&[("SPACEBIO_DATA_DIR", "/tmp/spacebio")])).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/spacebio")));
    }

    #[test]
    fn test_offline_flag() {
        let on = Config::from_lookup(lookup_from(&[("SPACEBIO_OFFLINE", "TRUE")])).unwrap();
        let off = Config::from_lookup(lookup_from(&[("SPACEBIO_OFFLINE", "0")])).unwrap();
        assert!(on.offline);
        assert!(!off.offline);
        assert!(Config::from_lookup(lookup_from(&[("SPACEBIO_OFFLINE", "maybe")])).is_err());
    }
}
