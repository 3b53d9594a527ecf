use crate::core::errors::{PipesError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_API_KEY: &str = "SMARTPIPES_API_KEY";
const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
const ENV_REPLICATE_API_KEY: &str = "REPLICATE_API_KEY";
const ENV_INFERENCE_ENDPOINT: &str = "SMARTPIPES_INFERENCE_ENDPOINT";
const ENV_OPENAI_ENDPOINT: &str = "SMARTPIPES_OPENAI_ENDPOINT";
const ENV_REPLICATE_ENDPOINT: &str = "SMARTPIPES_REPLICATE_ENDPOINT";
const ENV_STORE_PATH: &str = "SMARTPIPES_STORE_PATH";
const ENV_MODE: &str = "SMARTPIPES_ENV";
const ENV_HOST: &str = "SMARTPIPES_HOST";
const ENV_PORT: &str = "SMARTPIPES_PORT";
const ENV_API_TOKEN: &str = "SMARTPIPES_API_TOKEN";
const ENV_REQUEST_TIMEOUT: &str = "SMARTPIPES_REQUEST_TIMEOUT_SECS";

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_REPLICATE_ENDPOINT: &str = "https://api.replicate.com/v1";

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on every route except the health check
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1337,
            api_token: None,
        }
    }
}

/// Process configuration for adapters and the local server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Platform key, used by the `bloom` inference endpoint
    pub api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub replicate_api_key: Option<String>,
    /// Platform inference endpoint; no default, bloom tasks fail without it
    pub inference_endpoint: Option<String>,
    pub openai_endpoint: String,
    pub replicate_endpoint: String,
    /// Directory of the sled database handed to vectordb tasks
    pub store_path: PathBuf,
    pub production: bool,
    /// Timeout applied to every outbound adapter request
    pub request_timeout_secs: u64,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            openai_api_key: None,
            replicate_api_key: None,
            inference_endpoint: None,
            openai_endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            replicate_endpoint: DEFAULT_REPLICATE_ENDPOINT.to_string(),
            store_path: PathBuf::from(".smartpipes").join("store"),
            production: false,
            request_timeout_secs: 60,
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, then apply environment overrides
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Config::default();

        cfg.api_key = get(ENV_API_KEY);
        cfg.openai_api_key = get(ENV_OPENAI_API_KEY);
        cfg.replicate_api_key = get(ENV_REPLICATE_API_KEY);
        cfg.inference_endpoint = get(ENV_INFERENCE_ENDPOINT);
        if let Some(v) = get(ENV_OPENAI_ENDPOINT) {
            cfg.openai_endpoint = v;
        }
        if let Some(v) = get(ENV_REPLICATE_ENDPOINT) {
            cfg.replicate_endpoint = v;
        }
        if let Some(v) = get(ENV_STORE_PATH) {
            cfg.store_path = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_MODE) {
            cfg.production = v.trim().eq_ignore_ascii_case("production");
        }
        if let Some(v) = get(ENV_HOST) {
            cfg.server.host = v;
        }
        if let Some(v) = get(ENV_PORT) {
            cfg.server.port = v.trim().parse().map_err(|_| {
                PipesError::configuration_field(format!("invalid port '{v}'"), ENV_PORT)
            })?;
        }
        cfg.server.api_token = get(ENV_API_TOKEN);
        if let Some(v) = get(ENV_REQUEST_TIMEOUT) {
            cfg.request_timeout_secs = v.trim().parse().map_err(|_| {
                PipesError::configuration_field(
                    format!("invalid request timeout '{v}'"),
                    ENV_REQUEST_TIMEOUT,
                )
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(PipesError::configuration_field(
                "request timeout must be greater than 0",
                "request_timeout_secs",
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(PipesError::configuration_field("host cannot be empty", "server.host"));
        }
        if self.openai_endpoint.trim().is_empty() || self.replicate_endpoint.trim().is_empty() {
            return Err(PipesError::configuration("provider endpoints cannot be empty"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.server.port, 1337);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert!(cfg.server.api_token.is_none());
        assert!(!cfg.production);
        assert_eq!(cfg.openai_endpoint, DEFAULT_OPENAI_ENDPOINT);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("SMARTPIPES_ENV", "Production"),
            ("SMARTPIPES_PORT", "8080"),
            ("SMARTPIPES_API_TOKEN", "secret"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SMARTPIPES_API_KEY", "   "),
        ]))
        .unwrap();
        assert!(cfg.production);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.api_token.as_deref(), Some("secret"));
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-test"));
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let err = Config::from_lookup(lookup(&[("SMARTPIPES_PORT", "eighty")])).unwrap_err();
        assert_eq!(err.category(), "configuration");

        let err =
            Config::from_lookup(lookup(&[("SMARTPIPES_REQUEST_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, PipesError::Configuration { .. }));
    }
}
