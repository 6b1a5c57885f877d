use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::models::AppSettings;
use crate::services::SettingsService;
use crate::AppState;

/// Liveness probe
/// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Branding and feature toggles for the UI
/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Result<Json<AppSettings>> {
    Ok(Json(SettingsService::load(&state.db).await?))
}

/// Unknown API paths answer with JSON instead of the frontend
pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}
