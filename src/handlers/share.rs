use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::json;

use crate::error::{AppError, MessageResponse, Result};
use crate::handlers::{activity, require_feature};
use crate::models::{
    ActivityType, CreateShareRequest, CurrentUser, ShareInfo, ShareLink, ShareLinkResponse,
    ShareTarget, VerifyShareQuery,
};
use crate::services::{AccessContext, AccessService, ActivityService, SettingsService, ShareService};
use crate::AppState;

/// Create a share link for an item the caller can open
/// POST /api/share
pub async fn create_share(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ShareLinkResponse>> {
    let settings = SettingsService::load(&state.db).await?;
    require_feature(settings.enable_public_shares, &ctx, "Sharing is disabled")?;

    let target = ShareTarget::parse(&req.path)
        .ok_or_else(|| AppError::BadRequest("Invalid share path".to_string()))?;
    AccessService::authorize(&state.db, &state.config, state.drive.as_ref(), &ctx, target.id())
        .await?;

    let link = ShareService::create_share(&state.db, &state.config, &current_user, req).await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::ShareCreated)
            .target(target.id(), Some(link.item_name.clone()))
            .details(json!({ "path": link.path, "expiresAt": link.expires_at })),
    )
    .await;

    Ok(Json(link))
}

/// GET /api/share
pub async fn list_shares(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<ShareLink>>> {
    Ok(Json(ShareService::list_shares(&state.db, &current_user).await?))
}

/// DELETE /api/share/:id
pub async fn revoke_share(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let link = ShareService::revoke_share(&state.db, &current_user, &id).await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::ShareRevoked)
            .target(link.target_id, Some(link.item_name))
            .details(json!({ "path": link.path })),
    )
    .await;
    Ok(Json(MessageResponse::new("Share link revoked")))
}

/// Decode a share link for the landing page
/// GET /api/share/verify
pub async fn verify_share(
    State(state): State<AppState>,
    Query(query): Query<VerifyShareQuery>,
) -> Result<Json<ShareInfo>> {
    let claims = ShareService::verify_token(&state.db, &state.config, &query.token).await?;
    Ok(Json(ShareService::share_info(&claims)))
}
