use serde::{ Serialize, Deserialize };

use super::chat::ChatMessage;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    /// Base64 image bytes, optionally as a `data:` URL.
    pub data: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "upload")] Upload {
        images: Vec<UploadedFile>,
        #[serde(default)]
        show_images: Option<bool>,
    },
    #[serde(rename = "set_api_key")] SetApiKey {
        api_key: String,
    },
    #[serde(rename = "history")]
    History,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "greeting")] Greeting {
        content: String,
    },
    #[serde(rename = "notice")] Notice {
        message: String,
    },
    #[serde(rename = "upload_dialog")] UploadDialog {
        hint: String,
    },
    #[serde(rename = "user_message")] UserMessage {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },
    #[serde(rename = "response")] Response {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "history")] History {
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "processing")]
    Processing,
}
