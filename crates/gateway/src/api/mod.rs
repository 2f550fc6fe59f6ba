//! HTTP control surface.

pub mod projects;
pub mod sessions;
pub mod summarize;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::state::AppState;

/// Standardized JSON error: `{ "detail": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost",
        "http://localhost:8000",
        "http://127.0.0.1",
        "http://127.0.0.1:8000",
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Sessions
        .route("/session/create", post(sessions::create_session))
        .route("/sessions", get(sessions::list_sessions))
        .route("/session/:id/rename", post(sessions::rename_session))
        .route("/session/:id", delete(sessions::kill_session))
        .route("/session/:id/transcript", get(sessions::get_transcript))
        .route(
            "/session/:id/transcript/download",
            get(sessions::download_transcript),
        )
        .route("/session/:id/event", post(sessions::record_client_event))
        .route("/session/:id/audio", post(sessions::transcribe_audio))
        // Summarizer
        .route("/summarize", post(summarize::summarize_text))
        // Projects & branches
        .route("/projects", get(projects::list_projects))
        .route("/project/:project/branches", get(projects::list_branches))
        .route("/project/:project", delete(projects::delete_project))
        .route("/project/:project/branch", post(projects::create_branch))
        .route(
            "/project/:project/branch/:branch",
            delete(projects::delete_branch),
        )
        .route(
            "/project/:project/branch/:branch/merge",
            post(projects::merge_branch),
        )
        .route(
            "/project/:project/branch/:branch/sync",
            post(projects::sync_branch),
        )
        .route(
            "/project/:project/branch/:branch/session",
            post(projects::open_branch_session),
        )
        // Live transport
        .route("/ws/:session_id", get(crate::ws::session_ws))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}
