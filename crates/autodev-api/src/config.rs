//! Server configuration.
//!
//! Loaded from environment variables. `AUTODEV_ENV` selects between the
//! local KV endpoint (`localhost:2379`) and a production endpoint list; the
//! remaining variables carry the cluster-facing names the engine publishes
//! under.

use autodev_core::{Error, Result};
use autodev_engine::EngineConfig;

/// Deployment environment selected by `AUTODEV_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development: KV at `localhost:2379`.
    #[default]
    Local,
    /// Production: KV endpoints from `AUTODEV_KV_ENDPOINTS`.
    Production,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment environment.
    pub environment: Environment,
    /// Consistent-KV endpoints.
    pub kv_endpoints: Vec<String>,
    /// External base domain published hostnames are built under.
    pub base_domain: String,
    /// Name of the shared ingress object.
    pub ingress_name: String,
    /// Cluster namespace all session objects live in.
    pub namespace: String,
    /// HTTP listen port.
    pub http_port: u16,
    /// Pretty logs and development fallbacks.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            kv_endpoints: vec!["localhost:2379".to_string()],
            base_domain: "localtest.me".to_string(),
            ingress_name: "minimal-ingress".to_string(),
            namespace: "default".to_string(),
            http_port: 8080,
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for unparseable values, an unknown
    /// `AUTODEV_ENV`, or a production environment without KV endpoints.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let environment = match lookup("AUTODEV_ENV").as_deref() {
            None | Some("local") => Environment::Local,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "AUTODEV_ENV must be 'local' or 'production', got {other:?}"
                )))
            }
        };

        let kv_endpoints = match lookup("AUTODEV_KV_ENDPOINTS") {
            Some(raw) => raw
                .split(',')
                .map(|endpoint| endpoint.trim().to_string())
                .filter(|endpoint| !endpoint.is_empty())
                .collect(),
            None if environment == Environment::Production => {
                return Err(Error::InvalidInput(
                    "AUTODEV_KV_ENDPOINTS is required when AUTODEV_ENV=production".to_string(),
                ))
            }
            None => defaults.kv_endpoints.clone(),
        };

        let http_port = match lookup("AUTODEV_HTTP_PORT") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::InvalidInput(format!("AUTODEV_HTTP_PORT must be a port number, got {raw:?}"))
            })?,
            None => defaults.http_port,
        };

        let debug = matches!(
            lookup("AUTODEV_DEBUG").as_deref(),
            Some("1") | Some("true")
        );

        Ok(Self {
            environment,
            kv_endpoints,
            base_domain: lookup("AUTODEV_BASE_DOMAIN").unwrap_or(defaults.base_domain),
            ingress_name: lookup("AUTODEV_INGRESS").unwrap_or(defaults.ingress_name),
            namespace: lookup("AUTODEV_NAMESPACE").unwrap_or(defaults.namespace),
            http_port,
            debug,
        })
    }

    /// Projects the engine-facing subset of the configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            base_domain: self.base_domain.clone(),
            ingress_name: self.ingress_name.clone(),
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_string())
    }

    #[test]
    fn test_defaults_are_local() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.environment, Environment::Local);
        assert_eq!(config.kv_endpoints, vec!["localhost:2379".to_string()]);
        assert_eq!(config.ingress_name, "minimal-ingress");
        assert_eq!(config.http_port, 8080);
        assert!(!config.debug);
    }

    #[test]
    fn test_production_requires_kv_endpoints() {
        let err = Config::from_lookup(lookup(&[("AUTODEV_ENV", "production")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let config = Config::from_lookup(lookup(&[
            ("AUTODEV_ENV", "production"),
            ("AUTODEV_KV_ENDPOINTS", "kv-0:2379, kv-1:2379"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(
            config.kv_endpoints,
            vec!["kv-0:2379".to_string(), "kv-1:2379".to_string()]
        );
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let err = Config::from_lookup(lookup(&[("AUTODEV_ENV", "staging")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_port_must_parse() {
        let err = Config::from_lookup(lookup(&[("AUTODEV_HTTP_PORT", "many")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_engine_config_projection() {
        let config = Config::from_lookup(lookup(&[
            ("AUTODEV_BASE_DOMAIN", "sessions.example.dev"),
            ("AUTODEV_INGRESS", "edge"),
        ]))
        .unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.base_domain, "sessions.example.dev");
        assert_eq!(engine.ingress_name, "edge");
    }
}
