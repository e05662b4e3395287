//! Configuration for the chat subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::errors::{ChatError, ChatResult};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion model settings.
    pub llm: LlmConfig,
}

impl ChatConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are empty or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.storage.thread_table.is_empty() {
            return Err(ChatError::InvalidConfig(
                "storage.thread_table must not be empty".to_string(),
            ));
        }

        if self.storage.checkpoint_table.is_empty() {
            return Err(ChatError::InvalidConfig(
                "storage.checkpoint_table must not be empty".to_string(),
            ));
        }

        if self.llm.model.is_empty() {
            return Err(ChatError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        if let Some(base_url) = &self.llm.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Storage configuration.
///
/// The thread-name table and the checkpoint table live in the same
/// database file; the two row sets are correlated only by thread id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Thread display-name table.
    pub thread_table: String,
    /// Checkpoint (message history) table.
    pub checkpoint_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chatloom.db"),
            thread_table: "thread_names".to_string(),
            checkpoint_table: "checkpoints".to_string(),
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional max tokens.
    pub max_tokens: Option<u64>,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct-q8_0".to_string(),
            temperature: 0.4,
            max_tokens: None,
            base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_model_rejected() {
        let mut config = ChatConfig::default();
        config.llm.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config = ChatConfig::default();
        config.llm.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }
}
