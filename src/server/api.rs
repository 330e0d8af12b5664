use crate::agent::{ StoryAgent, IMAGES_COMMAND };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{ routing::get, Router, extract::State, Json };
use serde::Serialize;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct InfoResponse {
    model: String,
    server_key_configured: bool,
    images_command: &'static str,
    greeting: String,
}

#[derive(Clone)]
struct AppState {
    agent: Arc<StoryAgent>,
}

fn router(agent: Arc<StoryAgent>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(cors)
        .with_state(AppState { agent })
}

pub async fn start_http_server(
    http_port: u16,
    agent: Arc<StoryAgent>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(agent);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("HTTP server started");
    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn info_handler(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        model: state.agent.model().to_string(),
        server_key_configured: state.agent.server_key_configured(),
        images_command: IMAGES_COMMAND,
        greeting: state.agent.prompts().greeting.clone(),
    })
}
