use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::error::{AppError, Result};
use crate::models::{DriveFile, DriveFileList, DriveRevision, StorageQuota};

/// Downloaded file content, streamed from the provider
pub struct DriveContent {
    pub mime_type: String,
    pub size: Option<u64>,
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

impl DriveContent {
    /// Buffer the whole body, failing once it grows past `limit` bytes
    pub async fn into_bytes(self, limit: u64) -> Result<Bytes> {
        if self.size.is_some_and(|size| size > limit) {
            return Err(AppError::BadRequest("File is too large".to_string()));
        }

        let mut stream = self.stream;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.try_next().await? {
            if (buf.len() + chunk.len()) as u64 > limit {
                return Err(AppError::BadRequest("File is too large".to_string()));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Operations the index needs from Google Drive
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// List the non-trashed children of a folder, folders first
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<DriveFileList>;

    /// Fetch file metadata
    async fn get_file(&self, file_id: &str) -> Result<DriveFile>;

    /// Stream file content
    async fn download(&self, file_id: &str) -> Result<DriveContent>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile>;

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<DriveFile>;

    async fn copy(
        &self,
        file_id: &str,
        parent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DriveFile>;

    /// Re-parent a file from `from_id` to `to_id`
    async fn move_file(&self, file_id: &str, from_id: &str, to_id: &str) -> Result<DriveFile>;

    async fn rename(&self, file_id: &str, name: &str) -> Result<DriveFile>;

    /// Move a file to the Drive trash
    async fn trash(&self, file_id: &str) -> Result<()>;

    /// Delete a file permanently
    async fn delete(&self, file_id: &str) -> Result<()>;

    /// Name search across the Drive
    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<DriveFile>>;

    async fn revisions(&self, file_id: &str) -> Result<Vec<DriveRevision>>;

    async fn storage_quota(&self) -> Result<StorageQuota>;

    /// Top of the indexed tree
    fn root_folder_id(&self) -> &str;
}
