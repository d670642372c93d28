use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::models::ProjectInput;
use crate::AppState;

fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Malformed JSON bodies become a validation error rather than axum's
/// plain-text rejection.
fn body(
    payload: Result<Json<ProjectInput>, axum::extract::rejection::JsonRejection>,
) -> AppResult<ProjectInput> {
    payload
        .map(|Json(input)| input)
        .map_err(|e| AppError::validation(e.body_text()))
}

pub async fn list_portals(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    Ok(envelope(state.projects.list_portals().await?))
}

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Path(portal_id): Path<String>,
) -> AppResult<Json<Value>> {
    Ok(envelope(state.projects.list_projects(&portal_id).await?))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path((portal_id, project_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    Ok(envelope(state.projects.get_project(&portal_id, &project_id).await?))
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Path(portal_id): Path<String>,
    payload: Result<Json<ProjectInput>, axum::extract::rejection::JsonRejection>,
) -> AppResult<Json<Value>> {
    let input = body(payload)?;
    Ok(envelope(state.projects.create_project(&portal_id, &input).await?))
}

pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Path((portal_id, project_id)): Path<(String, String)>,
    payload: Result<Json<ProjectInput>, axum::extract::rejection::JsonRejection>,
) -> AppResult<Json<Value>> {
    let input = body(payload)?;
    Ok(envelope(
        state.projects.update_project(&portal_id, &project_id, &input).await?,
    ))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path((portal_id, project_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    Ok(envelope(state.projects.delete_project(&portal_id, &project_id).await?))
}
