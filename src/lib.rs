pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;

use agent::StoryAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP API Port: {:?}", args.http_port);
    info!("Chat Model: {}", args.chat_model);
    info!("Chat Base URL: {}", args.chat_base_url);
    info!("Server API Key: {}", if args.gemini_api_key.trim().is_empty() { "not set" } else { "set" });
    info!("Prompts Path: {}", args.prompts_path);
    info!("Show Images By Default: {}", args.show_images);
    info!("Max Message Size: {}", args.max_message_size);
    info!("-------------------------");

    let agent = Arc::new(StoryAgent::new(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}
