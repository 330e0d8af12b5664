use clap::Parser;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat LLM Provider Args ---
    /// API Key for Gemini. Leave empty to have each session supply its own key.
    #[arg(long, env = "GEMINI_API_KEY", default_value = "", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Model name for chat completion (e.g., gemini-1.5-pro, gemini-1.5-flash)
    #[arg(long, env = "CHAT_MODEL", default_value = "gemini-1.5-pro")]
    pub chat_model: String,

    /// Base URL of the Gemini models endpoint. The model name is appended to it.
    #[arg(long, env = "CHAT_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub chat_base_url: String,

    // --- Session Args ---
    /// Path to the prompt configuration file. Built-in prompts are used if it does not exist.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Initial value of the per-session "show images" toggle.
    #[arg(long, env = "SHOW_IMAGES", default_value = "false")]
    pub show_images: bool,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional port for the HTTP API (health and info endpoints).
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Largest WebSocket message accepted from a client, in bytes. Uploads travel base64 encoded.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "16777216")]
    pub max_message_size: usize,
}
