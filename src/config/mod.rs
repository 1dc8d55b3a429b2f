//! Application configuration
//!
//! Values come from an optional TOML file (path in `CHATAPP_CONFIG`) and are
//! then overridden by environment variables. API keys are never compiled in.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [gemini]
//! model = "gemini-pro"
//! request_timeout_secs = 30
//!
//! [auth]
//! base_url = "https://identitytoolkit.googleapis.com/v1"
//! ```

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Reply endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Hard limit for one reply request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Identity provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub firebase_api_key: Option<String>,

    #[serde(default = "default_auth_base_url")]
    pub base_url: String,
}

fn default_auth_base_url() -> String {
    DEFAULT_AUTH_BASE_URL.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            firebase_api_key: None,
            base_url: default_auth_base_url(),
        }
    }
}

impl Config {
    /// Load the TOML file named by `CHATAPP_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match env::var("CHATAPP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup such as the process environment
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(url) = lookup("GEMINI_BASE_URL") {
            self.gemini.base_url = url;
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            self.gemini.request_timeout_secs = secs.parse().map_err(|_| {
                ConfigError::Validation(format!("REQUEST_TIMEOUT_SECS is not a number: {secs}"))
            })?;
        }
        if let Some(key) = lookup("FIREBASE_API_KEY") {
            self.auth.firebase_api_key = Some(key);
        }
        if let Some(url) = lookup("FIREBASE_AUTH_URL") {
            self.auth.base_url = url;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE_CONFIG: &str = r#"
[server]
host = "0.0.0.0"
port = 8080

[gemini]
model = "gemini-1.5-flash"
request_timeout_secs = 10

[auth]
base_url = "http://localhost:9099/identitytoolkit.googleapis.com/v1"
"#;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_config() {
        let config = Config::from_toml(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.gemini.request_timeout_secs, 10);
        assert_eq!(config.gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        assert!(config.gemini.api_key.is_none());
        assert!(config.auth.base_url.starts_with("http://localhost:9099"));
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.gemini.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.gemini.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.auth.base_url, DEFAULT_AUTH_BASE_URL);
    }

    #[test]
    fn test_env_overrides_file() {
        let env = vars(&[
            ("PORT", "9000"),
            ("GEMINI_API_KEY", "secret"),
            ("FIREBASE_API_KEY", "fb-secret"),
        ]);
        let config = Config::from_toml(SAMPLE_CONFIG)
            .unwrap()
            .with_overrides(|key| env.get(key).cloned())
            .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.gemini.api_key.as_deref(), Some("secret"));
        assert_eq!(config.auth.firebase_api_key.as_deref(), Some("fb-secret"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let env = vars(&[("PORT", "not-a-port")]);
        let err = Config::default()
            .with_overrides(|key| env.get(key).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let env = vars(&[("REQUEST_TIMEOUT_SECS", "0")]);
        let err = Config::default()
            .with_overrides(|key| env.get(key).cloned())
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }
}
