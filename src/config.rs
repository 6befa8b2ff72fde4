//! Controller configuration from `KULTA_*` environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `KULTA_SELECTOR_LABELS` | `app,name,app.kubernetes.io/name` |
//! | `KULTA_INCLUDE_LABEL_PREFIX` | empty |
//! | `KULTA_ENABLE_CONFIG_TRACKING` | `true` |
//! | `KULTA_HEALTH_PORT` | `8080` |
//! | `KULTA_WATCH_NAMESPACE` | all namespaces |

use thiserror::Error;

pub const DEFAULT_SELECTOR_LABELS: &[&str] = &["app", "name", "app.kubernetes.io/name"];
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a port number, got {value:?}")]
    InvalidPort { name: &'static str, value: String },

    #[error("{name} must be true/false or 1/0, got {value:?}")]
    InvalidBool { name: &'static str, value: String },

    #[error("{name} must list at least one label key")]
    EmptyList { name: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Candidate pod selector label keys, in priority order
    pub selector_labels: Vec<String>,
    /// Label key prefixes copied from targets to primaries
    pub include_label_prefix: Vec<String>,
    pub enable_config_tracking: bool,
    pub health_port: u16,
    /// Restrict the canary watch to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            selector_labels: DEFAULT_SELECTOR_LABELS
                .iter()
                .map(|label| label.to_string())
                .collect(),
            include_label_prefix: Vec::new(),
            enable_config_tracking: true,
            health_port: DEFAULT_HEALTH_PORT,
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source
    ///
    /// Unset and empty variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("KULTA_SELECTOR_LABELS") {
            config.selector_labels = split_list(&value);
            if config.selector_labels.is_empty() {
                return Err(ConfigError::EmptyList {
                    name: "KULTA_SELECTOR_LABELS",
                });
            }
        }

        if let Some(value) = get("KULTA_INCLUDE_LABEL_PREFIX") {
            config.include_label_prefix = split_list(&value);
        }

        if let Some(value) = get("KULTA_ENABLE_CONFIG_TRACKING") {
            let parsed = match value.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            };
            config.enable_config_tracking = parsed.ok_or(ConfigError::InvalidBool {
                name: "KULTA_ENABLE_CONFIG_TRACKING",
                value,
            })?;
        }

        if let Some(value) = get("KULTA_HEALTH_PORT") {
            config.health_port = value.trim().parse().map_err(|_| ConfigError::InvalidPort {
                name: "KULTA_HEALTH_PORT",
                value: value.clone(),
            })?;
        }

        config.watch_namespace = get("KULTA_WATCH_NAMESPACE").map(|ns| ns.trim().to_string());

        Ok(config)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
