//! Server configuration loaded from a TOML file with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the SQLite database. Defaults to the platform data
    /// dir (e.g. `~/.local/share/mneme`).
    pub data_dir: Option<PathBuf>,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    pub llm: LlmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            bind_addr: "127.0.0.1:7151".to_string(),
            llm: LlmConfig::default(),
        }
    }
}

/// Settings for the OpenRouter-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Overridden by `OPENROUTER_API_KEY` when set.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.2,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = fs::read_to_string(p)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(addr) = std::env::var("MNEME_BIND_ADDR") {
            if !addr.is_empty() {
                self.bind_addr = addr;
            }
        }
    }

    /// Resolve the SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        let dir = self
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("mneme")))
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join("mneme.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:7151");
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
    }

    #[test]
    fn parses_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:8080"

            [llm]
            model = "anthropic/claude-3-haiku"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.llm.model, "anthropic/claude-3-haiku");
        // Unspecified fields keep their defaults
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
    }
}
