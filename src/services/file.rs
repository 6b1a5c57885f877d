use bytes::Bytes;
use futures::future::join_all;
use std::collections::HashSet;

use crate::config::Config;
use crate::db::Database;
use crate::drive::{DriveApi, DriveContent};
use crate::error::{AppError, Result};
use crate::models::{
    BulkFailure, BulkResult, DriveFile, DriveFileList, DriveRevision, FileListResponse,
    FileResponse, StorageResponse,
};
use crate::services::{AccessService, CacheService};

const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 1000;
const DEFAULT_SEARCH_LIMIT: u32 = 50;
const MAX_SEARCH_LIMIT: u32 = 200;
const MAX_BULK_ITEMS: usize = 100;
const MAX_NAME_LEN: usize = 255;

/// Drive CRUD with cached reads
pub struct FileService;

impl FileService {
    /// Trimmed file name, rejecting empty names, path separators and overlong names
    pub fn validate_name(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".to_string()));
        }
        if name.contains('/') {
            return Err(AppError::BadRequest("Name cannot contain '/'".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AppError::BadRequest(format!(
                "Name cannot exceed {} characters",
                MAX_NAME_LEN
            )));
        }
        Ok(name.to_string())
    }

    /// File metadata through the cache
    pub async fn get_file(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
    ) -> Result<DriveFile> {
        let key = CacheService::file_key(file_id);
        if let Some(file) = CacheService::get::<DriveFile>(db, &key).await? {
            return Ok(file);
        }

        let file = drive.get_file(file_id).await?;
        if file.trashed {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        CacheService::set(db, &key, &file, config.cache.metadata_ttl_seconds).await?;
        Ok(file)
    }

    /// One page of a folder, folders first, with the protection flag filled in
    pub async fn list_files(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<FileListResponse> {
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let key = CacheService::listing_key(folder_id, page_token, page_size);

        let list = match CacheService::get::<DriveFileList>(db, &key).await? {
            Some(list) => list,
            None => {
                let list = drive.list_children(folder_id, page_token, page_size).await?;
                CacheService::set(db, &key, &list, config.cache.listing_ttl_seconds).await?;
                list
            }
        };

        let protected = AccessService::protected_ids(db).await?;
        let files = list
            .files
            .into_iter()
            .map(|file| {
                let is_protected = file.is_folder() && protected.contains(&file.id);
                FileResponse {
                    is_protected,
                    ..FileResponse::from(file)
                }
            })
            .collect();

        Ok(FileListResponse {
            files,
            next_page_token: list.next_page_token,
        })
    }

    pub async fn download(drive: &dyn DriveApi, file: &DriveFile) -> Result<DriveContent> {
        if file.is_folder() {
            return Err(AppError::BadRequest("Folders cannot be downloaded".to_string()));
        }
        if file.is_google_native() {
            return Err(AppError::BadRequest(
                "Google documents must be opened in Drive".to_string(),
            ));
        }
        drive.download(&file.id).await
    }

    pub async fn revisions(drive: &dyn DriveApi, file_id: &str) -> Result<Vec<DriveRevision>> {
        drive.revisions(file_id).await
    }

    pub async fn storage(drive: &dyn DriveApi) -> Result<StorageResponse> {
        Ok(StorageResponse::from(drive.storage_quota().await?))
    }

    /// Raw name search, callers filter what the visitor may see
    pub async fn search(
        drive: &dyn DriveApi,
        query: &str,
        limit: Option<u32>,
    ) -> Result<Vec<DriveFile>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("Search query cannot be empty".to_string()));
        }
        if query.chars().count() > 200 {
            return Err(AppError::BadRequest("Search query is too long".to_string()));
        }
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT);
        drive.search(query, limit).await
    }

    pub async fn create_folder(
        db: &Database,
        drive: &dyn DriveApi,
        parent_id: &str,
        name: &str,
    ) -> Result<DriveFile> {
        let name = Self::validate_name(name)?;
        let folder = drive.create_folder(parent_id, &name).await?;
        Self::invalidate_listings(db, [parent_id]).await?;
        Ok(folder)
    }

    pub async fn upload(
        db: &Database,
        drive: &dyn DriveApi,
        parent_id: &str,
        name: &str,
        mime_type: Option<&str>,
        data: Bytes,
    ) -> Result<DriveFile> {
        let name = Self::validate_name(name)?;
        let mime_type = match mime_type.filter(|m| !m.is_empty() && *m != "application/octet-stream") {
            Some(mime) => mime.to_string(),
            None => mime_guess::from_path(&name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };

        tracing::debug!("Uploading {} ({} bytes) to {}", name, data.len(), parent_id);
        let file = drive.upload(parent_id, &name, &mime_type, data).await?;
        Self::invalidate_listings(db, [parent_id]).await?;
        Ok(file)
    }

    pub async fn rename(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
        name: &str,
    ) -> Result<DriveFile> {
        let name = Self::validate_name(name)?;
        let before = Self::get_file(db, config, drive, file_id).await?;
        let file = drive.rename(file_id, &name).await?;

        CacheService::invalidate(db, &CacheService::file_key(file_id)).await?;
        Self::invalidate_listings(db, before.parents.iter().map(String::as_str)).await?;
        Ok(file)
    }

    pub async fn copy(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
        parent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DriveFile> {
        let name = name.map(Self::validate_name).transpose()?;
        let source = Self::get_file(db, config, drive, file_id).await?;
        if source.is_folder() {
            return Err(AppError::BadRequest("Folders cannot be copied".to_string()));
        }

        let copy = drive.copy(file_id, parent_id, name.as_deref()).await?;
        Self::invalidate_listings(db, copy.parents.iter().map(String::as_str)).await?;
        Ok(copy)
    }

    fn check_bulk(file_ids: &[String]) -> Result<()> {
        if file_ids.is_empty() {
            return Err(AppError::BadRequest("No files selected".to_string()));
        }
        if file_ids.len() > MAX_BULK_ITEMS {
            return Err(AppError::BadRequest(format!(
                "At most {} files can be processed at once",
                MAX_BULK_ITEMS
            )));
        }
        Ok(())
    }

    fn collect_bulk(ids: &[String], outcomes: Vec<Result<()>>) -> BulkResult {
        let mut result = BulkResult::default();
        for (id, outcome) in ids.iter().zip(outcomes) {
            match outcome {
                Ok(()) => result.succeeded.push(id.clone()),
                Err(e) => {
                    tracing::warn!("Bulk operation failed for {}: {}", id, e);
                    result.failed.push(BulkFailure {
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        result
    }

    /// Move files concurrently, failures are reported per file
    pub async fn move_files(
        db: &Database,
        drive: &dyn DriveApi,
        file_ids: &[String],
        from_id: &str,
        to_id: &str,
    ) -> Result<BulkResult> {
        Self::check_bulk(file_ids)?;
        if from_id == to_id {
            return Err(AppError::BadRequest(
                "Source and destination are the same folder".to_string(),
            ));
        }
        if file_ids.iter().any(|id| id == to_id) {
            return Err(AppError::BadRequest("A folder cannot be moved into itself".to_string()));
        }

        let outcomes = join_all(
            file_ids
                .iter()
                .map(|id| async move { drive.move_file(id, from_id, to_id).await.map(|_| ()) }),
        )
        .await;

        for id in file_ids {
            CacheService::invalidate(db, &CacheService::file_key(id)).await?;
        }
        Self::invalidate_listings(db, [from_id, to_id]).await?;
        Ok(Self::collect_bulk(file_ids, outcomes))
    }

    /// Trash or permanently delete files concurrently
    pub async fn delete_files(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_ids: &[String],
        permanent: bool,
    ) -> Result<BulkResult> {
        Self::check_bulk(file_ids)?;
        let root = drive.root_folder_id();
        if file_ids.iter().any(|id| id == root) {
            return Err(AppError::BadRequest("The root folder cannot be deleted".to_string()));
        }

        let outcomes: Vec<Result<Vec<String>>> = join_all(file_ids.iter().map(|id| async move {
            let file = Self::get_file(db, config, drive, id).await?;
            if permanent {
                drive.delete(id).await?;
            } else {
                drive.trash(id).await?;
            }
            Ok::<_, AppError>(file.parents)
        }))
        .await;

        let mut parents = HashSet::new();
        let outcomes: Vec<Result<()>> = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.map(|file_parents| {
                    parents.extend(file_parents);
                })
            })
            .collect();

        for id in file_ids {
            CacheService::invalidate(db, &CacheService::file_key(id)).await?;
            CacheService::invalidate_pattern(db, &CacheService::listing_pattern(id)).await?;
        }
        Self::invalidate_listings(db, parents.iter().map(String::as_str)).await?;
        Ok(Self::collect_bulk(file_ids, outcomes))
    }

    async fn invalidate_listings<'a>(
        db: &Database,
        folder_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        for folder_id in folder_ids {
            CacheService::invalidate_pattern(db, &CacheService::listing_pattern(folder_id)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::memory::MemoryDrive;
    use crate::services::auth::tests::test_config;

    fn fixture() -> MemoryDrive {
        let drive = MemoryDrive::new("root");
        drive.add_folder("docs", "Docs", "root");
        drive.add_folder("photos", "Photos", "root");
        drive.add_file("a", "a.txt", "docs", "text/plain", b"alpha");
        drive.add_file("b", "b.txt", "docs", "text/plain", b"beta");
        drive
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(FileService::validate_name("  report.pdf ").unwrap(), "report.pdf");
        assert!(FileService::validate_name("   ").is_err());
        assert!(FileService::validate_name("a/b").is_err());
        assert!(FileService::validate_name(&"x".repeat(256)).is_err());
        assert!(FileService::validate_name(&"x".repeat(255)).is_ok());
    }

    #[tokio::test]
    async fn test_listing_is_cached_until_a_write() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = fixture();

        let first = FileService::list_files(&db, &config, &drive, "root", None, None)
            .await
            .unwrap();
        assert_eq!(
            first.files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["Docs", "Photos"]
        );

        // Direct Drive changes are hidden by the cache
        drive.add_folder("music", "Music", "root");
        let cached = FileService::list_files(&db, &config, &drive, "root", None, None)
            .await
            .unwrap();
        assert_eq!(cached.files.len(), 2);

        FileService::create_folder(&db, &drive, "root", "Archive")
            .await
            .unwrap();
        let fresh = FileService::list_files(&db, &config, &drive, "root", None, None)
            .await
            .unwrap();
        assert_eq!(fresh.files.len(), 4);
    }

    #[tokio::test]
    async fn test_listing_pages_and_protection_flag() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = fixture();
        AccessService::protect_folder(&db, "photos", "family", "secret")
            .await
            .unwrap();

        let page = FileService::list_files(&db, &config, &drive, "root", None, Some(1))
            .await
            .unwrap();
        assert_eq!(page.files.len(), 1);
        assert!(!page.files[0].is_protected);
        let token = page.next_page_token.unwrap();

        let next = FileService::list_files(&db, &config, &drive, "root", Some(&token), Some(1))
            .await
            .unwrap();
        assert_eq!(next.files[0].id, "photos");
        assert!(next.files[0].is_protected);
        assert!(next.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_get_file_hits_drive_once() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = fixture();

        FileService::get_file(&db, &config, &drive, "a").await.unwrap();
        FileService::get_file(&db, &config, &drive, "a").await.unwrap();
        assert_eq!(drive.lookups(), 1);
    }

    #[tokio::test]
    async fn test_bulk_move_reports_each_file() {
        let db = Database::in_memory().await;
        let drive = fixture();
        let ids = vec!["a".to_string(), "missing".to_string(), "b".to_string()];

        let result = FileService::move_files(&db, &drive, &ids, "docs", "photos")
            .await
            .unwrap();
        assert_eq!(result.succeeded, vec!["a", "b"]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].id, "missing");
        assert_eq!(drive.snapshot("a").unwrap().parents, vec!["photos"]);

        let err = FileService::move_files(&db, &drive, &ids, "docs", "docs")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_trashes_and_refreshes_listing() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = fixture();
        FileService::list_files(&db, &config, &drive, "docs", None, None)
            .await
            .unwrap();

        let result = FileService::delete_files(&db, &config, &drive, &["a".to_string()], false)
            .await
            .unwrap();
        assert_eq!(result.succeeded, vec!["a"]);
        assert!(drive.snapshot("a").unwrap().trashed);

        let listing = FileService::list_files(&db, &config, &drive, "docs", None, None)
            .await
            .unwrap();
        assert_eq!(listing.files.len(), 1);

        let err = FileService::delete_files(&db, &config, &drive, &["root".to_string()], true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_upload_guesses_mime_type() {
        let db = Database::in_memory().await;
        let drive = fixture();
        let file = FileService::upload(&db, &drive, "docs", "cat.png", None, Bytes::from_static(b"\x89PNG"))
            .await
            .unwrap();
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.size, Some(4));
    }

    #[tokio::test]
    async fn test_rename_and_copy() {
        let db = Database::in_memory().await;
        let config = test_config();
        let drive = fixture();

        let renamed = FileService::rename(&db, &config, &drive, "a", "alpha.txt")
            .await
            .unwrap();
        assert_eq!(renamed.name, "alpha.txt");
        let cached = FileService::get_file(&db, &config, &drive, "a").await.unwrap();
        assert_eq!(cached.name, "alpha.txt");

        let copy = FileService::copy(&db, &config, &drive, "a", Some("photos"), Some("copy.txt"))
            .await
            .unwrap();
        assert_eq!(copy.parents, vec!["photos"]);
        assert!(FileService::copy(&db, &config, &drive, "docs", None, None)
            .await
            .is_err());
    }
}
