use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::{MessageResponse, Result};
use crate::handlers::{require_admin, require_viewer};
use crate::models::{
    AddFavoriteRequest, CurrentUser, Favorite, FileTags, PinFolderRequest, PinnedFolder,
    SetTagsRequest, TagQuery,
};
use crate::services::{AccessContext, AccessService, MetadataService};
use crate::AppState;

/// GET /api/favorites
pub async fn list_favorites(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<Favorite>>> {
    Ok(Json(
        MetadataService::list_favorites(&state.db, &current_user.id).await?,
    ))
}

/// POST /api/favorites
pub async fn add_favorite(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<AddFavoriteRequest>,
) -> Result<Json<Favorite>> {
    let favorite = MetadataService::add_favorite(
        &state.db,
        &current_user.id,
        &req.file_id,
        &req.name,
        req.mime_type.as_deref(),
    )
    .await?;
    Ok(Json(favorite))
}

/// DELETE /api/favorites/:file_id
pub async fn remove_favorite(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(file_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    MetadataService::remove_favorite(&state.db, &current_user.id, &file_id).await?;
    Ok(Json(MessageResponse::new("Removed from favorites")))
}

/// Files carrying `tag` that the caller may open, or every tag with its usage count
/// GET /api/tags
pub async fn list_tags(
    State(state): State<AppState>,
    ctx: AccessContext,
    Query(query): Query<TagQuery>,
) -> Result<Json<Value>> {
    require_viewer(&state.config, &ctx)?;
    match query.tag.filter(|t| !t.trim().is_empty()) {
        Some(tag) => {
            let tagged = MetadataService::files_with_tag(&state.db, &tag).await?;
            let file_ids = AccessService::visible_ids(
                &state.db,
                &state.config,
                state.drive.as_ref(),
                &ctx,
                tagged,
            )
            .await;
            Ok(Json(json!({ "tag": tag.trim().to_lowercase(), "fileIds": file_ids })))
        }
        None => {
            let tags = MetadataService::tag_counts(&state.db).await?;
            Ok(Json(json!({ "tags": tags })))
        }
    }
}

/// GET /api/tags/:file_id
pub async fn get_tags(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(file_id): Path<String>,
) -> Result<Json<FileTags>> {
    AccessService::authorize(&state.db, &state.config, state.drive.as_ref(), &ctx, &file_id)
        .await?;
    Ok(Json(MetadataService::get_tags(&state.db, &file_id).await?))
}

/// PUT /api/tags/:file_id
pub async fn set_tags(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(file_id): Path<String>,
    Json(req): Json<SetTagsRequest>,
) -> Result<Json<FileTags>> {
    require_admin(&current_user)?;
    Ok(Json(
        MetadataService::set_tags(&state.db, &file_id, &req.tags).await?,
    ))
}

/// GET /api/pins
pub async fn list_pins(
    State(state): State<AppState>,
    ctx: AccessContext,
) -> Result<Json<Vec<PinnedFolder>>> {
    require_viewer(&state.config, &ctx)?;
    Ok(Json(MetadataService::list_pins(&state.db).await?))
}

/// POST /api/pins
pub async fn pin_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<PinFolderRequest>,
) -> Result<Json<PinnedFolder>> {
    require_admin(&current_user)?;
    let pin =
        MetadataService::pin_folder(&state.db, &req.folder_id, &req.name, &current_user.id).await?;
    Ok(Json(pin))
}

/// DELETE /api/pins/:folder_id
pub async fn unpin_folder(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(folder_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    require_admin(&current_user)?;
    MetadataService::unpin_folder(&state.db, &folder_id).await?;
    Ok(Json(MessageResponse::new("Folder unpinned")))
}
