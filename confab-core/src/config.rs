//! Configuration types

use crate::{ConfabResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of consecutive agent-to-agent exchanges allowed before the
/// router halts automatic responses.
pub const DEFAULT_TURN_LIMIT: u32 = 5;

/// Environment variable naming an alternate world-config file.
pub const CONFIG_PATH_ENV: &str = "CONFAB_WORLD_CONFIG";

/// Configuration for an external tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Endpoint the tool executor connects to
    pub endpoint: String,
    /// Tools agents are permitted to call; empty means all
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

/// Per-world configuration: provider/model defaults, turn limit, and the
/// optional tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Default LLM provider for agents without an explicit one
    pub default_provider: String,
    /// Default model for agents without an explicit one
    pub default_model: String,
    /// Max consecutive agent-to-agent exchanges before forced stop
    #[serde(default = "default_turn_limit")]
    pub turn_limit: u32,
    /// Optional tool-server configuration
    #[serde(default)]
    pub tool_server: Option<ToolServerConfig>,
}

fn default_turn_limit() -> u32 {
    DEFAULT_TURN_LIMIT
}

impl WorldConfig {
    /// Build a config for a provider/model pair with the default turn limit.
    pub fn for_model(provider: &str, model: &str) -> Self {
        Self {
            default_provider: provider.to_string(),
            default_model: model.to_string(),
            turn_limit: DEFAULT_TURN_LIMIT,
            tool_server: None,
        }
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> ConfabResult<Self> {
        let config: WorldConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file. If `CONFAB_WORLD_CONFIG` is set, it
    /// overrides the supplied path.
    pub fn from_file(path: impl AsRef<Path>) -> ConfabResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - default_provider and default_model are non-empty
    /// - turn_limit > 0
    /// - tool_server endpoint is non-empty when a tool server is configured
    pub fn validate(&self) -> ConfabResult<()> {
        if self.default_provider.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "default_provider".to_string(),
            }
            .into());
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "default_model".to_string(),
            }
            .into());
        }

        if self.turn_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "turn_limit".to_string(),
                value: "0".to_string(),
                reason: "turn_limit must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(tool_server) = &self.tool_server {
            if tool_server.endpoint.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "tool_server.endpoint".to_string(),
                    value: String::new(),
                    reason: "endpoint must be non-empty".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfabError;

    #[test]
    fn test_config_validation_valid() {
        let config = WorldConfig::for_model("anthropic", "claude-sonnet");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero_turn_limit() {
        let mut config = WorldConfig::for_model("anthropic", "claude-sonnet");
        config.turn_limit = 0;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfabError::Config(ConfigError::InvalidValue { field, .. })) if field == "turn_limit"
        ));
    }

    #[test]
    fn test_config_validation_rejects_empty_model() {
        let mut config = WorldConfig::for_model("anthropic", "claude-sonnet");
        config.default_model = "  ".to_string();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfabError::Config(ConfigError::MissingRequired { field })) if field == "default_model"
        ));
    }

    #[test]
    fn test_config_from_toml() {
        let text = r#"
            default_provider = "anthropic"
            default_model = "claude-sonnet"
            turn_limit = 8

            [tool_server]
            endpoint = "http://localhost:9100"
            allowed_tools = ["shell", "search"]
        "#;
        let config = WorldConfig::from_toml_str(text).unwrap();
        assert_eq!(config.turn_limit, 8);
        let tool_server = config.tool_server.unwrap();
        assert_eq!(tool_server.allowed_tools.len(), 2);
    }

    #[test]
    fn test_config_from_toml_defaults_turn_limit() {
        let text = r#"
            default_provider = "anthropic"
            default_model = "claude-sonnet"
        "#;
        let config = WorldConfig::from_toml_str(text).unwrap();
        assert_eq!(config.turn_limit, DEFAULT_TURN_LIMIT);
        assert!(config.tool_server.is_none());
    }

    #[test]
    fn test_config_from_toml_rejects_garbage() {
        let result = WorldConfig::from_toml_str("not toml ][");
        assert!(matches!(
            result,
            Err(ConfabError::Config(ConfigError::Parse { .. }))
        ));
    }
}
