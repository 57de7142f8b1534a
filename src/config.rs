//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::completion::GenerationParams;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Inline key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/tangent/tangent.db".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    GenerationParams::default().temperature
}

fn default_max_tokens() -> u32 {
    GenerationParams::default().max_tokens
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    /// Resolve the API key: inline value first, then the configured env var
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./tangent.yaml (current directory)
    /// 3. ~/.config/tangent/tangent.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "tangent.yaml".to_string(),
            shellexpand::tilde("~/.config/tangent/tangent.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                tracing::debug!("Loaded config from {}", search_path);
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.params(), GenerationParams::default());
        assert!(config.database.path.ends_with("tangent.db"));
    }

    #[test]
    fn test_inline_api_key_wins() {
        let config = CompletionConfig {
            api_key: Some("sk-inline".to_string()),
            api_key_env: "TANGENT_TEST_UNSET_KEY".to_string(),
            ..CompletionConfig::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("sk-inline"));

        let blank = CompletionConfig {
            api_key: Some("   ".to_string()),
            api_key_env: "TANGENT_TEST_UNSET_KEY".to_string(),
            ..CompletionConfig::default()
        };
        assert_eq!(blank.api_key(), None);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/tangent/test.db

server:
  port: 8080

completion:
  base_url: http://localhost:11434/v1
  model: llama3
  max_tokens: 256
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "~/.local/share/tangent/test.db");
        assert_eq!(config.bind_address(), ("127.0.0.1".to_string(), 8080));
        assert_eq!(config.completion.model, "llama3");
        assert_eq!(config.completion.max_tokens, 256);
        assert!((config.completion.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "server:\n  host: 0.0.0.0\n").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3001);
    }
}
