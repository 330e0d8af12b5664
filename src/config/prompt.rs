use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;

pub const DEFAULT_IMAGE_STORY_PROMPT: &str = "Write a beautiful story based on provided image";

const DEFAULT_GREETING: &str = "Hi there 👋

My self Story Writer. I am a bot 🤖 who can convert your beautiful images (illustrations, drawings, paintings) into well crafted stories.

I can incorporate the images that you provide into the story, or generate the story based on images ✨

If you don't have images, don't worry. I can also write stories for you based on your prompts.

Provide the images by calling the image dialog or just prompt an idea!

> 💡Tip: call the image dialog using the `\\images` command.";

#[derive(Debug)]
pub enum PromptError {
    EmptyTemplate(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::EmptyTemplate(key) => write!(f, "Prompt template '{}' is empty", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// User-facing texts. Keys missing from the file keep their built-in value.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    pub greeting: String,
    pub image_story_prompt: String,
    pub missing_api_key_notice: String,
    pub api_key_saved_notice: String,
    pub upload_dialog_hint: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            image_story_prompt: DEFAULT_IMAGE_STORY_PROMPT.to_string(),
            missing_api_key_notice: "Please add your Gemini API key to continue.".to_string(),
            api_key_saved_notice: "Gemini API key saved for this session.".to_string(),
            upload_dialog_hint: "Upload your image(s) here! PNG and JPEG files are supported.".to_string(),
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        let fields = [
            ("greeting", &self.greeting),
            ("image_story_prompt", &self.image_story_prompt),
            ("missing_api_key_notice", &self.missing_api_key_notice),
            ("api_key_saved_notice", &self.api_key_saved_notice),
            ("upload_dialog_hint", &self.upload_dialog_hint),
        ];
        for (key, value) in fields {
            if value.trim().is_empty() {
                return Err(PromptError::EmptyTemplate(key.to_string()));
            }
        }
        Ok(())
    }
}

/// Loads prompts from `path`, falling back to the built-in set when the file does not exist.
pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let path = path.as_ref();
    if !path.exists() {
        info!("Prompts file '{}' not found, using built-in prompts", path.display());
        return Ok(Arc::new(PromptConfig::default()));
    }

    let file_content = fs::read_to_string(path)?;
    let config: PromptConfig = serde_json::from_str(&file_content)?;
    config.validate()?;
    info!("Loaded prompts from '{}'", path.display());
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_prompts(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_uses_builtins() {
        let config = load_prompts("does/not/exist.json").unwrap();
        assert_eq!(*config, PromptConfig::default());
        assert_eq!(config.image_story_prompt, DEFAULT_IMAGE_STORY_PROMPT);
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let file = write_prompts(r#"{ "greeting": "Welcome!" }"#);
        let config = load_prompts(file.path()).unwrap();
        assert_eq!(config.greeting, "Welcome!");
        assert_eq!(config.image_story_prompt, DEFAULT_IMAGE_STORY_PROMPT);
    }

    #[test]
    fn empty_templates_are_rejected() {
        let file = write_prompts(r#"{ "image_story_prompt": "  " }"#);
        let err = load_prompts(file.path()).unwrap_err();
        assert!(matches!(err, PromptError::EmptyTemplate(ref key) if key == "image_story_prompt"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let file = write_prompts("{ not json");
        let err = load_prompts(file.path()).unwrap_err();
        assert!(matches!(err, PromptError::JsonError(_)));
        assert!(err.source().is_some());
    }
}
