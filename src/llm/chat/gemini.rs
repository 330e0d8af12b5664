use async_trait::async_trait;
use reqwest::{ Client, StatusCode };
use serde::{ Deserialize, Serialize };
use log::{ info, error };

use super::{ ChatClient, FragmentStream, http_stream_lines };
use crate::error::ChatError;
use crate::llm::LlmConfig;
use crate::models::chat::{ ConversationHistory, Prompt, Role };

#[derive(Serialize)]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleChunk {
    candidates: Option<Vec<GoogleCandidate>>,
    prompt_feedback: Option<GooglePromptFeedback>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    content: Option<GoogleContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GoogleContent {
    parts: Option<Vec<GooglePart>>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GoogleErrorWrapper {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

/// Finish reasons that mean the candidate was withheld rather than completed.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Earlier turns go out as text only; the image of the current prompt precedes its text.
fn build_request(context: &ConversationHistory, prompt: &Prompt) -> GeminiStreamRequest {
    let mut contents: Vec<GeminiContent> = context
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| GeminiContent {
            role: role_name(m.role),
            parts: vec![GeminiPart::Text { text: m.content.clone() }],
        })
        .collect();

    let mut parts = Vec::with_capacity(2);
    if let Some(image) = prompt.image() {
        parts.push(GeminiPart::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.to_base64(),
            },
        });
    }
    parts.push(GeminiPart::Text { text: prompt.text().to_string() });
    contents.push(GeminiContent { role: "user", parts });

    GeminiStreamRequest { contents }
}

/// Parses one line of the `alt=sse` stream. Blank lines and non-data fields are skipped.
fn parse_gemini_line(line: &str) -> Option<Result<String, ChatError>> {
    let line = line.trim();
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let chunk: GoogleChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            return Some(Err(ChatError::MalformedResponse(format!("{}: {}", e, payload))));
        }
    };

    if let Some(err) = chunk.error {
        return Some(Err(ChatError::Status {
            status: err.code.unwrap_or(500),
            message: err.message.or(err.status).unwrap_or_else(|| "stream error".to_string()),
        }));
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Some(Err(ChatError::MalformedResponse(format!("prompt blocked: {}", reason))));
    }

    let candidate = chunk.candidates.unwrap_or_default().into_iter().next()?;
    let finish_reason = candidate.finish_reason;
    let text: String = candidate.content
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    match finish_reason {
        Some(reason) if text.is_empty() && BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
            Some(Err(ChatError::MalformedResponse(format!("response withheld: {}", reason))))
        }
        _ if text.is_empty() => None,
        _ => Some(Ok(text)),
    }
}

fn map_http_error(status: StatusCode, body: &str) -> ChatError {
    let parsed = serde_json::from_str::<GoogleErrorWrapper>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|w| w.error.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    let key_rejected =
        status == StatusCode::UNAUTHORIZED ||
        status == StatusCode::FORBIDDEN ||
        (status == StatusCode::BAD_REQUEST &&
            (body.contains("API_KEY_INVALID") || body.contains("API key not valid")));

    if key_rejected {
        ChatError::Configuration(format!("Gemini rejected the API key: {}", message))
    } else {
        ChatError::Status { status: status.as_u16(), message }
    }
}

pub struct GeminiChatClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, ChatError> {
        if api_key.trim().is_empty() {
            return Err(ChatError::Configuration("Gemini API key is empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            model,
            base_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| {
                ChatError::Configuration("Gemini API key is required for GeminiChatClient".to_string())
            })?;
        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    fn stream_url(&self) -> String {
        format!("{}/{}:streamGenerateContent", self.base_url.trim_end_matches('/'), self.model)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_message(
        &self,
        context: &ConversationHistory,
        prompt: &Prompt
    ) -> Result<FragmentStream, ChatError> {
        let url = self.stream_url();
        info!("GeminiChatClient::stream_message() → model={} url={}", self.model, url);

        let payload = build_request(context, prompt);
        let response = self.client
            .post(&url)
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Gemini responded {} for model {}", status, self.model);
            return Err(map_http_error(status, &body));
        }

        Ok(http_stream_lines(response, parse_gemini_line))
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
