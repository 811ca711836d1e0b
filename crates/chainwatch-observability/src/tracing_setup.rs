//! Tracing / logging initialisation helpers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Read `CHAINWATCH_LOG` and `CHAINWATCH_LOG_JSON`.
    ///
    /// `CHAINWATCH_LOG` is a comma-separated list: a bare level sets the
    /// global level, `component=level` adds an override, e.g.
    /// `info,chainwatch-rpc=debug`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(filter) = lookup("CHAINWATCH_LOG") {
            for part in filter.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                match part.split_once('=') {
                    Some((component, level)) => {
                        config
                            .components
                            .insert(component.trim().to_string(), level.trim().to_string());
                    }
                    None => config.level = part.to_string(),
                }
            }
        }
        if let Some(json) = lookup("CHAINWATCH_LOG_JSON") {
            config.json = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        config
    }

    /// Filter directives, e.g. `"info,chainwatch_rpc=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }

    fn filter(&self) -> Result<EnvFilter, ObservabilityError> {
        let directives = self.directives();
        EnvFilter::try_new(&directives).map_err(|e| ObservabilityError::InvalidFilter {
            directives,
            reason: e.to_string(),
        })
    }
}

/// Install the global subscriber described by `config`. Logs go to stderr.
/// Should be called once at application startup.
pub fn init_tracing(config: &LogConfig) -> Result<(), ObservabilityError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| ObservabilityError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn directives_normalize_component_names() {
        let mut config = LogConfig::default();
        config.components.insert("chainwatch-rpc".into(), "debug".into());
        config.components.insert("chainwatch-monitor".into(), "trace".into());
        assert_eq!(
            config.directives(),
            "info,chainwatch_monitor=trace,chainwatch_rpc=debug"
        );
    }

    #[test]
    fn env_filter_sets_level_and_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHAINWATCH_LOG", "warn, chainwatch-decode=debug"),
            ("CHAINWATCH_LOG_JSON", "true"),
        ]);
        let config = LogConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.level, "warn");
        assert_eq!(config.components["chainwatch-decode"], "debug");
        assert!(config.json);
    }

    #[test]
    fn missing_env_gives_defaults() {
        assert_eq!(LogConfig::from_lookup(|_| None), LogConfig::default());
    }

    #[test]
    fn invalid_level_is_rejected() {
        let config = LogConfig {
            level: "info,chainwatch_rpc=notalevel".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.filter(),
            Err(ObservabilityError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{ "json": true }"#).unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
        assert!(config.components.is_empty());
    }
}
