use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::handlers::files::content_disposition;
use crate::handlers::{activity, require_feature};
use crate::models::ActivityType;
use crate::services::{
    AccessContext, AccessService, ActivityService, FileService, MediaService, SettingsService,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub size: Option<u32>,
}

/// Resized JPEG preview of an image
/// GET /api/thumbnail/:id
pub async fn thumbnail(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response> {
    let drive = state.drive.as_ref();
    AccessService::authorize(&state.db, &state.config, drive, &ctx, &id).await?;

    let file = FileService::get_file(&state.db, &state.config, drive, &id).await?;
    let size = MediaService::thumbnail_size(query.size);
    let jpeg = MediaService::thumbnail(drive, &file, size).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .header(header::CONTENT_LENGTH, jpeg.len())
        .body(Body::from(jpeg))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Folder contents as a zip archive
/// GET /api/files/:id/zip
pub async fn download_zip(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<String>,
) -> Result<Response> {
    let drive = state.drive.as_ref();
    let settings = SettingsService::load(&state.db).await?;
    require_feature(settings.enable_downloads, &ctx, "Downloads are disabled")?;
    AccessService::authorize(&state.db, &state.config, drive, &ctx, &id).await?;

    let folder = FileService::get_file(&state.db, &state.config, drive, &id).await?;
    let archive = MediaService::archive(&state.db, &state.config, drive, &ctx, &folder).await?;

    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::Download)
            .target(folder.id.clone(), Some(folder.name.clone()))
            .details(json!({ "archive": true, "bytes": archive.len() })),
    )
    .await;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, archive.len())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&format!("{}.zip", folder.name)),
        )
        .body(Body::from(archive))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
