use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::handlers::{activity, require_admin, require_feature};
use crate::models::{
    ActivityType, BulkResult, CopyFileRequest, CreateFolderRequest, CurrentUser,
    DeleteFilesRequest, DriveFile, DriveRevision, FileListResponse, FileQuery, FileResponse,
    MoveFilesRequest, NewActivity, RenameFileRequest, SearchQuery, StorageResponse,
};
use crate::services::{
    AccessContext, AccessService, ActivityService, FileService, SettingsService,
};
use crate::AppState;

fn file_response(file: DriveFile, protected: &HashSet<String>) -> FileResponse {
    let is_protected = file.is_folder() && protected.contains(&file.id);
    FileResponse {
        is_protected,
        ..FileResponse::from(file)
    }
}

/// `attachment` header keeping non-ASCII names intact
pub(crate) fn content_disposition(name: &str) -> String {
    let fallback_name = name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(name);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_name, encoded_name
    )
}

/// Children of a folder, the indexed root when no folder is given
/// GET /api/files
pub async fn list_files(
    State(state): State<AppState>,
    ctx: AccessContext,
    Query(query): Query<FileQuery>,
) -> Result<Json<FileListResponse>> {
    let drive = state.drive.as_ref();
    let folder_id = query
        .folder_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| drive.root_folder_id().to_string());

    AccessService::authorize(&state.db, &state.config, drive, &ctx, &folder_id).await?;
    let list = FileService::list_files(
        &state.db,
        &state.config,
        drive,
        &folder_id,
        query.page_token.as_deref(),
        query.page_size,
    )
    .await?;
    Ok(Json(list))
}

/// GET /api/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>> {
    let drive = state.drive.as_ref();
    AccessService::authorize(&state.db, &state.config, drive, &ctx, &id).await?;
    let file = FileService::get_file(&state.db, &state.config, drive, &id).await?;
    let protected = AccessService::protected_ids(&state.db).await?;
    Ok(Json(file_response(file, &protected)))
}

/// Stream file content from Drive
/// GET /api/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<String>,
) -> Result<Response> {
    let drive = state.drive.as_ref();
    let settings = SettingsService::load(&state.db).await?;
    require_feature(settings.enable_downloads, &ctx, "Downloads are disabled")?;
    AccessService::authorize(&state.db, &state.config, drive, &ctx, &id).await?;

    let file = FileService::get_file(&state.db, &state.config, drive, &id).await?;
    let content = FileService::download(drive, &file).await?;

    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::Download).target(file.id.clone(), Some(file.name.clone())),
    )
    .await;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content.mime_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(&file.name));
    if let Some(size) = content.size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }
    builder
        .body(Body::from_stream(content.stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// GET /api/files/:id/revisions
pub async fn list_revisions(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(id): Path<String>,
) -> Result<Json<Vec<DriveRevision>>> {
    let drive = state.drive.as_ref();
    AccessService::authorize(&state.db, &state.config, drive, &ctx, &id).await?;
    Ok(Json(FileService::revisions(drive, &id).await?))
}

/// Name search, results the caller could not open are left out
/// GET /api/search
pub async fn search(
    State(state): State<AppState>,
    ctx: AccessContext,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<FileResponse>>> {
    let settings = SettingsService::load(&state.db).await?;
    require_feature(settings.enable_search, &ctx, "Search is disabled")?;

    let drive = state.drive.as_ref();
    let found = FileService::search(drive, &query.q, query.limit).await?;
    let visible = AccessService::filter_visible(&state.db, &state.config, drive, &ctx, found).await?;
    let protected = AccessService::protected_ids(&state.db).await?;

    Ok(Json(
        visible
            .into_iter()
            .map(|file| file_response(file, &protected))
            .collect(),
    ))
}

/// GET /api/storage
pub async fn storage(State(state): State<AppState>) -> Result<Json<StorageResponse>> {
    Ok(Json(FileService::storage(state.drive.as_ref()).await?))
}

/// POST /api/files/folder
pub async fn create_folder(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateFolderRequest>,
) -> Result<Json<FileResponse>> {
    require_admin(&current_user)?;

    let drive = state.drive.as_ref();
    let parent_id = req
        .parent_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| drive.root_folder_id().to_string());
    let folder = FileService::create_folder(&state.db, drive, &parent_id, &req.name).await?;

    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::CreateFolder)
            .target(folder.id.clone(), Some(folder.name.clone()))
            .details(json!({ "parentId": parent_id })),
    )
    .await;
    Ok(Json(FileResponse::from(folder)))
}

/// PATCH /api/files/:id
pub async fn rename_file(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<RenameFileRequest>,
) -> Result<Json<FileResponse>> {
    require_admin(&current_user)?;

    let file = FileService::rename(&state.db, &state.config, state.drive.as_ref(), &id, &req.name)
        .await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::Rename).target(file.id.clone(), Some(file.name.clone())),
    )
    .await;
    Ok(Json(FileResponse::from(file)))
}

/// POST /api/files/:id/copy
pub async fn copy_file(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<CopyFileRequest>,
) -> Result<Json<FileResponse>> {
    require_admin(&current_user)?;

    let copy = FileService::copy(
        &state.db,
        &state.config,
        state.drive.as_ref(),
        &id,
        req.parent_id.as_deref().filter(|p| !p.is_empty()),
        req.name.as_deref(),
    )
    .await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::Copy)
            .target(id, Some(copy.name.clone()))
            .details(json!({ "copyId": copy.id })),
    )
    .await;
    Ok(Json(FileResponse::from(copy)))
}

fn bulk_activity(
    ctx: &AccessContext,
    kind: ActivityType,
    result: &BulkResult,
    mut details: Value,
) -> NewActivity {
    details["succeeded"] = json!(result.succeeded);
    details["failed"] = json!(result.failed.iter().map(|f| &f.id).collect::<Vec<_>>());
    let entry = activity(ctx, kind).details(details);
    if result.succeeded.is_empty() && !result.failed.is_empty() {
        entry.failed()
    } else {
        entry
    }
}

/// POST /api/files/move
pub async fn move_files(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<MoveFilesRequest>,
) -> Result<Json<BulkResult>> {
    require_admin(&current_user)?;

    let result = FileService::move_files(
        &state.db,
        state.drive.as_ref(),
        &req.file_ids,
        &req.from_id,
        &req.to_id,
    )
    .await?;
    ActivityService::record(
        &state.db,
        bulk_activity(
            &ctx,
            ActivityType::Move,
            &result,
            json!({ "fromId": req.from_id }),
        )
        .target(req.to_id, None),
    )
    .await;
    Ok(Json(result))
}

/// POST /api/files/delete
pub async fn delete_files(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<DeleteFilesRequest>,
) -> Result<Json<BulkResult>> {
    require_admin(&current_user)?;

    let result = FileService::delete_files(
        &state.db,
        &state.config,
        state.drive.as_ref(),
        &req.file_ids,
        req.permanent,
    )
    .await?;
    ActivityService::record(
        &state.db,
        bulk_activity(
            &ctx,
            ActivityType::Delete,
            &result,
            json!({ "permanent": req.permanent }),
        ),
    )
    .await;
    Ok(Json(result))
}

/// Multipart upload with `parentId` and `file` fields
/// POST /api/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    ctx: AccessContext,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<FileResponse>> {
    require_admin(&current_user)?;
    let settings = SettingsService::load(&state.db).await?;
    require_feature(settings.enable_uploads, &ctx, "Uploads are disabled")?;

    let mut parent_id: Option<String> = None;
    let mut upload: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to process multipart: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
                upload = Some((file_name, content_type, data));
            }
            "parentId" | "parent_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid parent id: {}", e)))?;
                if !text.trim().is_empty() {
                    parent_id = Some(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let drive = state.drive.as_ref();
    let parent_id = parent_id.unwrap_or_else(|| drive.root_folder_id().to_string());
    let size = data.len();

    let file = FileService::upload(
        &state.db,
        drive,
        &parent_id,
        &file_name,
        content_type.as_deref(),
        data,
    )
    .await?;
    ActivityService::record(
        &state.db,
        activity(&ctx, ActivityType::Upload)
            .target(file.id.clone(), Some(file.name.clone()))
            .details(json!({ "parentId": parent_id, "size": size })),
    )
    .await;
    Ok(Json(FileResponse::from(file)))
}
