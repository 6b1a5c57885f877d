use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::json;

use crate::error::{MessageResponse, Result};
use crate::handlers::{activity, require_admin};
use crate::models::{
    ActivityType, CurrentUser, FolderTokenResponse, ProtectFolderRequest, ProtectedFolder,
    UnlockFolderRequest,
};
use crate::services::{AccessContext, AccessService, ActivityService, CacheService};
use crate::AppState;

/// Trade a folder's access id and password for an unlock token
/// POST /api/auth/folder
pub async fn unlock_folder(
    State(state): State<AppState>,
    ctx: AccessContext,
    Json(req): Json<UnlockFolderRequest>,
) -> Result<Json<FolderTokenResponse>> {
    let result =
        AccessService::unlock_folder(&state.db, &state.config, &req.folder_id, &req.id, &req.password)
            .await;

    let entry = activity(&ctx, ActivityType::FolderUnlock)
        .target(req.folder_id.clone(), None)
        .details(json!({ "accessId": req.id }));
    match &result {
        Ok(_) => ActivityService::record(&state.db, entry).await,
        Err(_) => ActivityService::record(&state.db, entry.failed()).await,
    }

    Ok(Json(result?))
}

/// GET /api/admin/protected-folders
pub async fn list_protected(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<ProtectedFolder>>> {
    require_admin(&current_user)?;
    Ok(Json(AccessService::list_protected(&state.db).await?))
}

/// Create or replace a folder password
/// POST /api/admin/protected-folders
pub async fn protect_folder(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<ProtectFolderRequest>,
) -> Result<Json<ProtectedFolder>> {
    require_admin(&current_user)?;

    let folder = AccessService::protect_folder(&state.db, &req.folder_id, &req.id, &req.password).await?;
    CacheService::invalidate_pattern(&state.db, "drive:list:*").await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::ProtectedFolderUpdated)
            .target(folder.folder_id.clone(), None)
            .details(json!({ "action": "protect" })),
    )
    .await;

    Ok(Json(folder))
}

/// DELETE /api/admin/protected-folders/:folder_id
pub async fn unprotect_folder(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Path(folder_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    require_admin(&current_user)?;

    AccessService::unprotect_folder(&state.db, &folder_id).await?;
    CacheService::invalidate_pattern(&state.db, "drive:list:*").await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::ProtectedFolderUpdated)
            .target(folder_id, None)
            .details(json!({ "action": "unprotect" })),
    )
    .await;

    Ok(Json(MessageResponse::new("Folder protection removed")))
}
