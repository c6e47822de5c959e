use crate::config::FoundrySettings;
use crate::relay::AgentClient;
use crate::server::conversation::conversation_handler;
use std::path::Path;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::State,
    response::{ IntoResponse, Response },
    http::StatusCode,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{ Any, CorsLayer };
use tower_http::services::{ ServeDir, ServeFile };
use log::info;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<FoundrySettings>,
    pub client: Arc<dyn AgentClient>,
    /// Parent of every per-request cancellation token.
    pub shutdown: CancellationToken,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicConfig {
    enabled: bool,
    project: String,
    application: String,
    api_version: String,
}

/// API routes, plus the chat UI from `static_dir` (with index.html fallback) when it exists.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/conversation", post(conversation_handler))
        .with_state(state);

    if let Some(dir) = static_dir.filter(|d| d.is_dir()) {
        info!("Serving static files from {}", dir.display());
        let serve_dir = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        app = app.fallback_service(serve_dir);
    }

    app.layer(cors)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn config_handler(State(state): State<AppState>) -> impl IntoResponse {
    let settings = &state.settings;
    Json(PublicConfig {
        enabled: settings.enabled,
        project: settings.project.clone(),
        application: settings.application.clone(),
        api_version: settings.api_version.clone(),
    })
}
