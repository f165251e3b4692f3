//! Service configuration
//!
//! Defaults suit a single-node deployment. Values may come from a JSON
//! file, then be overridden by environment variables:
//! - `ERMPATH_LINK_POLICY` - `reject` or `disjunction`
//! - `ERMPATH_POOL_SIZE` - connections per catalog
//! - `ERMPATH_POOL_IDLE_SECS` - idle connection lifetime
//! - `ERMPATH_MODEL_CACHE_SIZE` - cached model snapshots

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How an implicit link with several candidate key references is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// Ambiguity is a model conflict
    #[default]
    Reject,
    /// Candidates joining the same two tables form one disjunctive link
    Disjunction,
}

impl LinkPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reject" => Some(LinkPolicy::Reject),
            "disjunction" => Some(LinkPolicy::Disjunction),
            _ => None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub link_policy: LinkPolicy,
    /// Maximum concurrent connections per catalog
    pub pool_size: usize,
    /// Seconds an idle connection is kept
    pub pool_idle_secs: u64,
    /// Maximum cached model snapshots across catalogs
    pub model_cache_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            link_policy: LinkPolicy::Reject,
            pool_size: 8,
            pool_idle_secs: 60,
            model_cache_size: 16,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        ServiceConfig::default().with_env()
    }

    /// Read a JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: ServiceConfig = serde_json::from_str(&text)?;
        config.with_env()
    }

    fn with_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("ERMPATH_LINK_POLICY") {
            self.link_policy = LinkPolicy::parse(&v)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown link policy \"{}\"", v)))?;
        }
        if let Some(v) = env_number("ERMPATH_POOL_SIZE")? {
            self.pool_size = v as usize;
        }
        if let Some(v) = env_number("ERMPATH_POOL_IDLE_SECS")? {
            self.pool_idle_secs = v;
        }
        if let Some(v) = env_number("ERMPATH_MODEL_CACHE_SIZE")? {
            self.model_cache_size = v as usize;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
        }
        if self.model_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "model_cache_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_secs)
    }
}

fn env_number(name: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got \"{}\"", name, v))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let config: ServiceConfig = serde_json::from_str(r#"{"link_policy": "disjunction"}"#).unwrap();
        assert_eq!(config.link_policy, LinkPolicy::Disjunction);
        assert_eq!(config.pool_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let config = ServiceConfig {
            pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_env() {
        env::remove_var("ERMPATH_POOL_SIZE");
        env::set_var("ERMPATH_LINK_POLICY", "Disjunction");
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.link_policy, LinkPolicy::Disjunction);

        env::set_var("ERMPATH_POOL_SIZE", "many");
        assert!(matches!(ServiceConfig::from_env(), Err(ConfigError::Invalid(_))));

        // Cleanup
        env::remove_var("ERMPATH_LINK_POLICY");
        env::remove_var("ERMPATH_POOL_SIZE");
    }
}
