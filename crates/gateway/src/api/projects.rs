//! Project & branch lifecycle endpoints.

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use kestrel_domain::error::Error;

use crate::api::api_error;
use crate::state::AppState;

/// Map workspace errors: precondition violations are 400s, the rest 500s.
fn workspace_error(e: Error) -> axum::response::Response {
    match e {
        Error::Workspace(msg) => api_error(StatusCode::BAD_REQUEST, msg),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub async fn list_projects(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.workspace().list_projects())
}

pub async fn list_branches(
    State(state): State<AppState>,
    UrlPath(project): UrlPath<String>,
) -> impl IntoResponse {
    Json(state.sessions.workspace().list_branches(&project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    UrlPath(project): UrlPath<String>,
) -> impl IntoResponse {
    let project_dir = state.sessions.workspace().project_dir(&project);
    for id in state.sessions.kill_sessions_under(&project_dir) {
        state.cancel_map.cancel(&id);
        state.cancel_map.remove(&id);
    }

    if state.sessions.workspace().delete_project(&project) {
        Json(serde_json::json!({ "status": "deleted", "project": project })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "Project not found")
    }
}

#[derive(Debug, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_branch: Option<String>,
}

pub async fn create_branch(
    State(state): State<AppState>,
    UrlPath(project): UrlPath<String>,
    Json(config): Json<BranchConfig>,
) -> impl IntoResponse {
    let source = config.source_branch.as_deref().unwrap_or("main");
    match state
        .sessions
        .workspace()
        .create_branch(&project, config.name.as_deref(), source)
        .await
    {
        Ok(branch) => Json(serde_json::json!({
            "status": "created",
            "project": project,
            "branch": branch,
        }))
        .into_response(),
        Err(e) => workspace_error(e),
    }
}

pub async fn delete_branch(
    State(state): State<AppState>,
    UrlPath((project, branch)): UrlPath<(String, String)>,
) -> impl IntoResponse {
    let branch_dir = state.sessions.workspace().branch_dir(&project, &branch);
    for id in state.sessions.kill_sessions_under(&branch_dir) {
        state.cancel_map.cancel(&id);
        state.cancel_map.remove(&id);
    }

    if state.sessions.workspace().delete_branch(&project, &branch) {
        Json(serde_json::json!({
            "status": "deleted",
            "project": project,
            "branch": branch,
        }))
        .into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "Branch not found")
    }
}

pub async fn merge_branch(
    State(state): State<AppState>,
    UrlPath((project, branch)): UrlPath<(String, String)>,
) -> impl IntoResponse {
    match state
        .sessions
        .workspace()
        .merge_branch_into_main(&project, &branch)
        .await
    {
        Ok(()) => Json(serde_json::json!({
            "status": "merged",
            "project": project,
            "branch": branch,
        }))
        .into_response(),
        Err(e) => workspace_error(e),
    }
}

pub async fn sync_branch(
    State(state): State<AppState>,
    UrlPath((project, branch)): UrlPath<(String, String)>,
) -> impl IntoResponse {
    match state
        .sessions
        .workspace()
        .sync_branch_from_main(&project, &branch)
        .await
    {
        Ok(()) => Json(serde_json::json!({
            "status": "synced",
            "project": project,
            "branch": branch,
        }))
        .into_response(),
        Err(e) => workspace_error(e),
    }
}

/// Open a session attached to an existing branch directory.
pub async fn open_branch_session(
    State(state): State<AppState>,
    UrlPath((project, branch)): UrlPath<(String, String)>,
) -> impl IntoResponse {
    let branch_dir = state.sessions.workspace().branch_dir(&project, &branch);
    if !branch_dir.exists() {
        return api_error(StatusCode::NOT_FOUND, "Branch not found");
    }

    match state.sessions.create_session(Some(branch_dir.as_path()), None).await {
        Ok(entry) => Json(serde_json::json!({
            "session_id": entry.id,
            "cwd": entry.cwd.display().to_string(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
