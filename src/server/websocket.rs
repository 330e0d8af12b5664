use crate::agent::{ StoryAgent, SubmitOutcome, IMAGES_COMMAND };
use crate::models::chat::Prompt;
use crate::models::image::ImageAttachment;
use crate::models::websocket::{ ClientMessage, ServerMessage, UploadedFile };
use crate::session::Session;

use std::error::Error;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };

use tokio_tungstenite::{ accept_async_with_config, WebSocketStream };
use tokio_tungstenite::tungstenite::protocol::{ Message, WebSocketConfig };

use chrono::Utc;
use futures::stream::SplitSink;
use futures::{ SinkExt, StreamExt };
use log::{ info, warn, error, debug };

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

/// Caps frames and reassembled messages while they are read.
pub fn ws_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

pub async fn start_ws_server(
    addr: &str,
    agent: Arc<StoryAgent>,
    max_message_size: usize
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Incoming connection from: {}", peer);
        let agent_clone = Arc::clone(&agent);

        tokio::spawn(async move {
            match accept_async_with_config(stream, Some(ws_config(max_message_size))).await {
                Ok(ws) => handle_connection(peer.to_string(), ws, agent_clone, max_message_size).await,
                Err(e) => error!("Handshake failed for {}: {}", peer, e),
            }
        });
    }
}

async fn send_message<S>(
    tx: &mut WsSink<S>,
    message: &ServerMessage
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Serves one client. The session lives exactly as long as this call.
pub async fn handle_connection<S>(
    peer: String,
    websocket: WebSocketStream<S>,
    agent: Arc<StoryAgent>,
    max_message_size: usize
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (mut tx, mut rx) = websocket.split();
    let mut session = agent.open_session();
    info!("Assigned session {} to {}", session.id(), peer);

    let greeting = ServerMessage::Greeting { content: agent.prompts().greeting.clone() };
    if let Err(e) = send_message(&mut tx, &greeting).await {
        error!("Failed to greet {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                info!("WebSocket connection closed or errored for {}: {}", peer, e);
                break;
            }
        };

        if message.len() > max_message_size {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                max_message_size
            );
            let error_msg = ServerMessage::Error { message: "Message too large".to_string() };
            if let Err(e) = send_message(&mut tx, &error_msg).await {
                error!("Failed to send size limit error to {}: {}", peer, e);
            }
            break;
        }

        let result = match message {
            Message::Text(text) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => {
                        handle_client_message(&agent, &mut session, client_msg, &mut tx).await
                    }
                    Err(e) => {
                        error!("Failed to parse message from {}: {}", peer, e);
                        let error_msg = ServerMessage::Error {
                            message: format!("Failed to parse message: {}", e),
                        };
                        send_message(&mut tx, &error_msg).await
                    }
                }
            }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(ping_data) => tx.send(Message::Pong(ping_data)).await.map_err(Into::into),
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                Ok(())
            }
            Message::Pong(_) | Message::Frame(_) => Ok(()),
        };

        if let Err(e) = result {
            error!("Error sending to {}: {}", peer, e);
            break;
        }
    }

    info!(
        "WebSocket connection closed for {} (session {}, open {}s, {} messages discarded)",
        peer,
        session.id(),
        (Utc::now() - session.created_at()).num_seconds(),
        session.history().len()
    );
}

async fn handle_client_message<S>(
    agent: &StoryAgent,
    session: &mut Session,
    message: ClientMessage,
    tx: &mut WsSink<S>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    match message {
        ClientMessage::Chat { content } => {
            if !session.api_key_configured() {
                let notice = ServerMessage::Notice {
                    message: agent.prompts().missing_api_key_notice.clone(),
                };
                return send_message(tx, &notice).await;
            }
            if content.trim() == IMAGES_COMMAND {
                let dialog = ServerMessage::UploadDialog {
                    hint: agent.prompts().upload_dialog_hint.clone(),
                };
                return send_message(tx, &dialog).await;
            }
            match agent.prepare_prompt(session, Some(content.as_str())) {
                Some(prompt) => run_prompt(agent, session, prompt, tx).await,
                None => {
                    let error_msg = ServerMessage::Error { message: "Prompt is empty".to_string() };
                    send_message(tx, &error_msg).await
                }
            }
        }
        ClientMessage::Upload { images, show_images } => {
            let decoded = match decode_uploads(&images) {
                Ok(decoded) => decoded,
                Err(message) => {
                    return send_message(tx, &ServerMessage::Error { message }).await;
                }
            };
            agent.stage_uploads(session, decoded, show_images);
            run_pending_uploads(agent, session, tx).await
        }
        ClientMessage::SetApiKey { api_key } => {
            match agent.configure_session(session, &api_key) {
                Ok(()) => {
                    let notice = ServerMessage::Notice {
                        message: agent.prompts().api_key_saved_notice.clone(),
                    };
                    send_message(tx, &notice).await?;
                    run_pending_uploads(agent, session, tx).await
                }
                Err(e) => {
                    send_message(tx, &ServerMessage::Error { message: e.to_string() }).await
                }
            }
        }
        ClientMessage::History => {
            let messages = session.history().messages().to_vec();
            send_message(tx, &ServerMessage::History { messages }).await
        }
    }
}

/// Rejects the whole batch if any file is not a usable PNG/JPEG.
fn decode_uploads(files: &[UploadedFile]) -> Result<Vec<ImageAttachment>, String> {
    files
        .iter()
        .map(|f| ImageAttachment::from_base64(f.filename.clone(), &f.data))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())
}

async fn run_pending_uploads<S>(
    agent: &StoryAgent,
    session: &mut Session,
    tx: &mut WsSink<S>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let config = session.config();
    if config.pending_uploads.is_empty() {
        debug!("Session {}: no pending uploads", session.id());
        return Ok(());
    }
    if !config.api_key_configured {
        let notice = ServerMessage::Notice {
            message: agent.prompts().missing_api_key_notice.clone(),
        };
        return send_message(tx, &notice).await;
    }
    debug!(
        "Session {}: running {} pending upload(s), show_images={}",
        session.id(),
        config.pending_uploads.len(),
        config.show_images
    );
    match agent.prepare_prompt(session, None) {
        Some(prompt) => run_prompt(agent, session, prompt, tx).await,
        None => Ok(()),
    }
}

async fn run_prompt<S>(
    agent: &StoryAgent,
    session: &mut Session,
    prompt: Prompt,
    tx: &mut WsSink<S>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let echo = ServerMessage::UserMessage {
        content: prompt.text().to_string(),
        image: if session.show_images() {
            prompt.image().map(ImageAttachment::to_base64)
        } else {
            None
        },
    };
    send_message(tx, &echo).await?;
    send_message(tx, &ServerMessage::Processing).await?;

    let reply = match agent.submit(session, prompt).await {
        Ok(SubmitOutcome::Replied { history }) => {
            match history.last() {
                Some(last) => ServerMessage::Response {
                    content: last.content.clone(),
                    timestamp: last.timestamp,
                },
                None => ServerMessage::Error { message: "Empty conversation".to_string() },
            }
        }
        Ok(SubmitOutcome::NeedsApiKey { notice }) => ServerMessage::Notice { message: notice },
        Err(e) if e.is_configuration() => {
            ServerMessage::Notice {
                message: format!("{} ({})", agent.prompts().missing_api_key_notice, e),
            }
        }
        Err(e) => {
            ServerMessage::Error {
                message: format!("Error processing message: {}", e),
            }
        }
    };
    send_message(tx, &reply).await
}
