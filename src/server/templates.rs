// ABOUTME: CRUD over named container templates

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::ContainerTemplate;

use super::AppState;

pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "templates": state.store.load_templates() }))
}

pub async fn create(
    State(state): State<AppState>,
    Json(mut template): Json<ContainerTemplate>,
) -> Result<Json<ContainerTemplate>, ApiError> {
    if template.name.trim().is_empty() || template.image.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "template needs a name and an image".into(),
        ));
    }
    if template.id.trim().is_empty() {
        template.id = Uuid::new_v4().to_string();
    }
    let mut templates = state.store.load_templates();
    if templates.iter().any(|t| t.id == template.id) {
        return Err(ApiError::NameConflict(template.id));
    }
    templates.push(template.clone());
    state.store.save_templates(&templates)?;
    Ok(Json(template))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(template): Json<ContainerTemplate>,
) -> Result<Json<ContainerTemplate>, ApiError> {
    let mut templates = state.store.load_templates();
    let slot = templates
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| ApiError::TargetMissing(format!("template not found: {id}")))?;
    *slot = ContainerTemplate {
        id: id.clone(),
        ..template
    };
    let updated = slot.clone();
    state.store.save_templates(&templates)?;
    Ok(Json(updated))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut templates = state.store.load_templates();
    let before = templates.len();
    templates.retain(|t| t.id != id);
    if templates.len() == before {
        return Err(ApiError::TargetMissing(format!("template not found: {id}")));
    }
    state.store.save_templates(&templates)?;
    Ok(Json(json!({ "ok": true })))
}
