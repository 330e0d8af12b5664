use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing API key, or a key the remote service refused.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Request to model service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response from model service: {0}")]
    MalformedResponse(String),

    /// Upload rejected before it reaches the conversation.
    #[error("Invalid input: {0}")]
    Input(String),
}

impl ChatError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ChatError::Configuration(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ChatError::Http(_) | ChatError::Status { .. } | ChatError::MalformedResponse(_)
        )
    }
}
