use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::assets::{get_config_dir, get_default_config};
use crate::error::BackendError;

#[derive(Error, Debug)]
pub enum TandemConfigError {
    #[error("File system error: {0}")]
    IO(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YAMLError(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Settings for the coding assistant, both engines.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Executable driven in structured streaming mode.
    pub command: String,
    /// Extra arguments placed before the streaming flags, e.g. `--model`.
    pub args: Vec<String>,
    /// Turn ceiling of a single mediated exchange.
    pub max_turns: u32,
    /// Interactive executable used by the native passthrough.
    pub native_command: String,
    pub native_args: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            max_turns: 50,
            native_command: "claude".to_string(),
            native_args: Vec::new(),
        }
    }
}

/// Settings for the OpenAI-compatible chat model.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub base_url: String,
    /// Either a literal key or `env:VARIABLE`.
    pub api_key: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key: "env:GEMINI_API_KEY".to_string(),
        }
    }
}

impl ChatConfig {
    /// Resolves `env:NAME` indirection to the variable's value.
    pub fn resolve_api_key(&self) -> Result<String, BackendError> {
        match self.api_key.strip_prefix("env:") {
            Some(name) => {
                let name = name.trim();
                std::env::var(name)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| BackendError::MissingCredential(name.to_string()))
            }
            None => Ok(self.api_key.clone()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub assistant: AssistantConfig,
    pub chat: ChatConfig,
}

#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    #[serde(default)]
    assistant: Option<AssistantConfig>,
    #[serde(default)]
    chat: Option<ChatConfig>,
}

impl RawConfig {
    #[instrument]
    fn to_config(&self) -> Result<Config, TandemConfigError> {
        let assistant = self.assistant.clone().unwrap_or_default();
        let chat = self.chat.clone().unwrap_or_default();

        if assistant.command.trim().is_empty() {
            return Err(TandemConfigError::Config(
                "assistant.command must not be empty".to_string(),
            ));
        }
        if assistant.native_command.trim().is_empty() {
            return Err(TandemConfigError::Config(
                "assistant.native_command must not be empty".to_string(),
            ));
        }
        if assistant.max_turns == 0 {
            return Err(TandemConfigError::Config(
                "assistant.max_turns must be at least 1".to_string(),
            ));
        }
        if chat.model.trim().is_empty() {
            return Err(TandemConfigError::Config(
                "chat.model must not be empty".to_string(),
            ));
        }

        Ok(Config { assistant, chat })
    }
}

#[instrument(skip(config_path))]
pub fn create_or_get_config_file(
    config_path: Option<PathBuf>,
) -> Result<(bool, PathBuf), TandemConfigError> {
    let actual_path = config_path.unwrap_or_else(|| {
        let config_dir = get_config_dir();
        config_dir.join("tandem.yml")
    });

    let parent_dir = actual_path.parent().ok_or_else(|| {
        TandemConfigError::IO(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Config path has no parent directory",
        ))
    })?;

    if !parent_dir.exists() {
        fs::create_dir_all(parent_dir)?;
    }

    if actual_path.exists() {
        Ok((true, actual_path))
    } else {
        File::create(&actual_path)?.write_all(get_default_config().as_bytes())?;
        Ok((false, actual_path))
    }
}

#[instrument(skip(config_path))]
pub fn get_config(config_path: Option<PathBuf>) -> Result<Config, TandemConfigError> {
    let (_, config_file) = create_or_get_config_file(config_path)?;
    let content = fs::read_to_string(&config_file)?;
    if content.trim().is_empty() {
        return RawConfig::default().to_config();
    }
    let raw: RawConfig = serde_yaml::from_str(&content)?;
    raw.to_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_temp_config;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RawConfig::default().to_config().unwrap();
        assert_eq!(config.assistant.command, "claude");
        assert_eq!(config.assistant.max_turns, 50);
        assert_eq!(config.assistant.native_command, "claude");
        assert_eq!(config.chat.api_key, "env:GEMINI_API_KEY");
    }

    #[test]
    fn test_get_config_partial_sections_use_defaults() {
        let path = create_temp_config(
            r#"
assistant:
  max_turns: 10
chat:
  model: gemini-2.5-pro
"#,
        );
        let config = get_config(Some(path)).unwrap();
        assert_eq!(config.assistant.max_turns, 10);
        assert_eq!(config.assistant.command, "claude");
        assert_eq!(config.chat.model, "gemini-2.5-pro");
        assert!(config.chat.base_url.starts_with("https://"));
    }

    #[test]
    fn test_get_config_empty_file() {
        let path = create_temp_config("");
        let config = get_config(Some(path)).unwrap();
        assert_eq!(config, RawConfig::default().to_config().unwrap());
    }

    #[test]
    fn test_get_config_throws_for_invalid_yaml() {
        let path = create_temp_config("assistant: [unclosed");
        let result = get_config(Some(path));
        assert!(matches!(result, Err(TandemConfigError::YAMLError(_))));
    }

    #[test]
    fn test_get_config_rejects_zero_turns() {
        let path = create_temp_config("assistant:\n  max_turns: 0\n");
        let err = get_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("max_turns"));
    }

    #[test]
    fn test_create_or_get_config_file_when_not_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tandem.yml");

        let (existed, created) = create_or_get_config_file(Some(path.clone())).unwrap();

        assert!(!existed);
        assert_eq!(created, path);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, get_default_config());
        // The embedded default must itself be a valid config.
        assert!(get_config(Some(path)).is_ok());
    }

    #[test]
    fn test_create_or_get_config_file_when_exists() {
        let path = create_temp_config("chat:\n  model: local-model\n");
        let (existed, _) = create_or_get_config_file(Some(path.clone())).unwrap();
        assert!(existed);
        assert_eq!(get_config(Some(path)).unwrap().chat.model, "local-model");
    }

    #[test]
    fn test_resolve_api_key_literal() {
        let chat = ChatConfig {
            api_key: "sk-literal".to_string(),
            ..Default::default()
        };
        assert_eq!(chat.resolve_api_key().unwrap(), "sk-literal");
    }

    #[test]
    fn test_resolve_api_key_missing_env() {
        let chat = ChatConfig {
            api_key: "env:TANDEM_TEST_SURELY_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let err = chat.resolve_api_key().unwrap_err();
        assert!(matches!(
            err,
            BackendError::MissingCredential(ref name) if name == "TANDEM_TEST_SURELY_UNSET_KEY"
        ));
    }
}
