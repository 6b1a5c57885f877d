use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::handlers::{activity, require_admin};
use crate::models::{
    ActivityLog, ActivityQuery, ActivityType, AnalyticsQuery, AnalyticsSummary, AppSettings,
    CurrentUser, PurgeCacheRequest, UpdateUserRoleRequest, UpdateUserStatusRequest, UserResponse,
};
use crate::services::{
    AccessContext, ActivityService, CacheService, SettingsService, UserService,
};
use crate::AppState;

/// List all users
/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<UserResponse>>> {
    require_admin(&current_user)?;
    Ok(Json(UserService::list_users(&state.db).await?))
}

/// PUT /api/admin/users/:id/role
pub async fn update_user_role(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRoleRequest>,
) -> Result<Json<UserResponse>> {
    require_admin(&current_user)?;
    if id == current_user.id {
        return Err(AppError::BadRequest("Cannot change your own role".to_string()));
    }
    Ok(Json(UserService::update_user_role(&state.db, &id, req.role).await?))
}

/// Update user status (enable/disable)
/// PUT /api/admin/users/:id/status
pub async fn update_user_status(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserStatusRequest>,
) -> Result<Json<UserResponse>> {
    require_admin(&current_user)?;

    // Cannot disable yourself
    if id == current_user.id {
        return Err(AppError::BadRequest("Cannot change your own status".to_string()));
    }
    Ok(Json(
        UserService::update_user_status(&state.db, &id, req.is_active).await?,
    ))
}

/// GET /api/admin/activity
pub async fn list_activity(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityLog>>> {
    require_admin(&current_user)?;
    Ok(Json(ActivityService::list(&state.db, &query).await?))
}

/// GET /api/admin/analytics
pub async fn analytics(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>> {
    require_admin(&current_user)?;
    Ok(Json(ActivityService::analytics(&state.db, query.days).await?))
}

/// Partial settings update
/// PUT /api/admin/config
pub async fn update_config(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(patch): Json<Value>,
) -> Result<Json<AppSettings>> {
    require_admin(&current_user)?;

    let keys: Vec<String> = patch
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let settings = SettingsService::update(&state.db, patch).await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::ConfigUpdated).details(json!({ "keys": keys })),
    )
    .await;

    Ok(Json(settings))
}

/// Drop cache keys matching a `*` pattern, everything when none is given
/// POST /api/admin/cache/purge
pub async fn purge_cache(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    body: Option<Json<PurgeCacheRequest>>,
) -> Result<Json<Value>> {
    require_admin(&current_user)?;

    let pattern = body
        .and_then(|Json(req)| req.pattern)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "*".to_string());
    let removed = CacheService::invalidate_pattern(&state.db, &pattern).await?;
    tracing::info!("{} purged {} cache keys matching {}", current_user.email, removed, pattern);

    Ok(Json(json!({ "pattern": pattern, "removed": removed })))
}
