pub mod gemini;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ debug, info };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::LlmConfig;
use self::gemini::GeminiChatClient;
use crate::error::ChatError;
use crate::models::chat::{ ConversationHistory, Prompt };

/// Text fragments in the order the service delivered them. Finite and not restartable.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends `prompt` with `context` as the earlier turns and returns the response as it streams in.
    async fn stream_message(
        &self,
        context: &ConversationHistory,
        prompt: &Prompt
    ) -> Result<FragmentStream, ChatError>;

    fn get_model(&self) -> String;
}

/// Concatenates fragments in arrival order. The first error aborts the response, and a
/// stream that carried no text at all is an error too.
pub async fn collect_fragments(mut stream: FragmentStream) -> Result<String, ChatError> {
    let mut response = String::new();
    let mut fragments = 0usize;
    while let Some(fragment) = stream.next().await {
        response.push_str(&fragment?);
        fragments += 1;
    }
    debug!("Assembled response from {} fragments ({} bytes)", fragments, response.len());
    if response.is_empty() {
        return Err(ChatError::MalformedResponse("response contained no text".to_string()));
    }
    Ok(response)
}

/// Conversational handle for one user session. The conversation itself lives in the
/// session's history, which is handed in on every send.
pub struct ModelSession {
    id: Uuid,
    client: Arc<dyn ChatClient>,
    exchanges: usize,
}

impl ModelSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub async fn send(
        &mut self,
        context: &ConversationHistory,
        prompt: &Prompt
    ) -> Result<String, ChatError> {
        info!(
            "ModelSession {} sending prompt #{} (model={}, context={} messages, image={})",
            self.id,
            self.exchanges + 1,
            self.client.get_model(),
            context.len(),
            prompt.image().is_some()
        );
        let stream = self.client.stream_message(context, prompt).await?;
        let response = collect_fragments(stream).await?;
        self.exchanges += 1;
        Ok(response)
    }
}

pub fn start_session(client: Arc<dyn ChatClient>) -> ModelSession {
    let session = ModelSession {
        id: Uuid::new_v4(),
        client,
        exchanges: 0,
    };
    info!("Started model session {} on {}", session.id, session.client.get_model());
    session
}

/// Builds a client for `config`. Only a missing key is rejected here; whether the
/// service accepts the key is found out on the first request.
pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client = GeminiChatClient::from_config(config)?;
    Ok(Arc::new(client))
}

/// Reads a streaming body line by line and forwards whatever `line_parser` extracts.
pub fn http_stream_lines(
    response: reqwest::Response,
    line_parser: fn(&str) -> Option<Result<String, ChatError>>
) -> FragmentStream {
    stream_lines(response.bytes_stream(), line_parser)
}

/// Splits a chunked byte stream into lines. A line may span any number of chunks,
/// including a split inside a multi-byte character; it is decoded only once complete.
pub(crate) fn stream_lines<S, B, E>(
    bytes: S,
    line_parser: fn(&str) -> Option<Result<String, ChatError>>
) -> FragmentStream
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<ChatError> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut bytes = Box::pin(bytes);
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(buf) => {
                    pending.extend_from_slice(buf.as_ref());
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        if let Some(item) = line_parser(&line) {
                            let failed = item.is_err();
                            if tx.send(item).await.is_err() || failed {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            }
        }

        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending);
            if let Some(item) = line_parser(&line) {
                let _ = tx.send(item).await;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
