pub mod chat;

use crate::cli::Args;
use crate::cli::DEFAULT_GEMINI_BASE_URL;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub completion_model: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            completion_model: "gemini-1.5-pro".to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

impl LlmConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_key: Some(args.gemini_api_key.clone()).filter(|k| !k.trim().is_empty()),
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
        }
    }

    /// Same model settings, different key. Used when a session enters its own key.
    pub fn with_api_key(&self, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()).filter(|k| !k.trim().is_empty()),
            ..self.clone()
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}
