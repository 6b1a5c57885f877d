use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::drive::{DriveApi, DriveContent};
use crate::error::{AppError, Result};
use crate::models::{DriveFile, DriveFileList, DriveRevision, StorageQuota, FOLDER_MIME_TYPE};

/// In-process Drive used by tests
pub struct MemoryDrive {
    root: String,
    files: Mutex<HashMap<String, (DriveFile, Bytes)>>,
    lookups: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryDrive {
    pub fn new(root: &str) -> Self {
        let drive = Self {
            root: root.to_string(),
            files: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        };
        drive.insert(Self::entry(root, "Root", FOLDER_MIME_TYPE, None, 0), Bytes::new());
        drive
    }

    fn entry(id: &str, name: &str, mime: &str, parent: Option<&str>, size: u64) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            size: (mime != FOLDER_MIME_TYPE).then_some(size),
            modified_time: Some("2024-01-01T00:00:00.000Z".to_string()),
            created_time: Some("2024-01-01T00:00:00.000Z".to_string()),
            thumbnail_link: None,
            web_view_link: None,
            icon_link: None,
            trashed: false,
        }
    }

    fn insert(&self, file: DriveFile, data: Bytes) {
        self.files
            .lock()
            .unwrap()
            .insert(file.id.clone(), (file, data));
    }

    fn fresh_id(&self) -> String {
        format!("gen{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: &str) {
        self.insert(
            Self::entry(id, name, FOLDER_MIME_TYPE, Some(parent), 0),
            Bytes::new(),
        );
    }

    /// A folder with no parent, like a second root in the same Drive
    pub fn add_top_level_folder(&self, id: &str, name: &str) {
        self.insert(
            Self::entry(id, name, FOLDER_MIME_TYPE, None, 0),
            Bytes::new(),
        );
    }

    pub fn add_file(&self, id: &str, name: &str, parent: &str, mime: &str, data: &[u8]) {
        self.insert(
            Self::entry(id, name, mime, Some(parent), data.len() as u64),
            Bytes::copy_from_slice(data),
        );
    }

    /// Number of `get_file` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, id: &str) -> Option<DriveFile> {
        self.files.lock().unwrap().get(id).map(|(f, _)| f.clone())
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut DriveFile)) -> Result<DriveFile> {
        let mut files = self.files.lock().unwrap();
        let (file, _) = files
            .get_mut(id)
            .filter(|(f, _)| !f.trashed)
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
        apply(file);
        Ok(file.clone())
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<DriveFileList> {
        let mut children: Vec<DriveFile> = self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(f, _)| f.clone())
            .filter(|f| !f.trashed && f.parents.iter().any(|p| p == folder_id))
            .collect();
        children.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.name.cmp(&b.name))
        });

        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size as usize).min(children.len());
        let next_page_token = (end < children.len()).then(|| end.to_string());

        Ok(DriveFileList {
            files: children.get(start..end).unwrap_or_default().to_vec(),
            next_page_token,
        })
    }

    async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.snapshot(file_id)
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    async fn download(&self, file_id: &str) -> Result<DriveContent> {
        let (file, data) = self
            .files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
        Ok(DriveContent {
            mime_type: file.mime_type,
            size: Some(data.len() as u64),
            stream: futures::stream::once(async move { Ok(data) }).boxed(),
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile> {
        let id = self.fresh_id();
        self.add_folder(&id, name, parent_id);
        self.get_file(&id).await
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<DriveFile> {
        let id = self.fresh_id();
        self.add_file(&id, name, parent_id, mime_type, &data);
        self.get_file(&id).await
    }

    async fn copy(
        &self,
        file_id: &str,
        parent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DriveFile> {
        let (mut file, data) = self
            .files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
        file.id = self.fresh_id();
        if let Some(name) = name {
            file.name = name.to_string();
        }
        if let Some(parent_id) = parent_id {
            file.parents = vec![parent_id.to_string()];
        }
        self.insert(file.clone(), data);
        Ok(file)
    }

    async fn move_file(&self, file_id: &str, from_id: &str, to_id: &str) -> Result<DriveFile> {
        self.update(file_id, |f| {
            f.parents.retain(|p| p != from_id);
            f.parents.push(to_id.to_string());
        })
    }

    async fn rename(&self, file_id: &str, name: &str) -> Result<DriveFile> {
        self.update(file_id, |f| f.name = name.to_string())
    }

    async fn trash(&self, file_id: &str) -> Result<()> {
        self.update(file_id, |f| f.trashed = true).map(|_| ())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<DriveFile>> {
        let needle = query.to_lowercase();
        let mut found: Vec<DriveFile> = self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(f, _)| f.clone())
            .filter(|f| !f.trashed && f.id != self.root && f.name.to_lowercase().contains(&needle))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found.truncate(page_size as usize);
        Ok(found)
    }

    async fn revisions(&self, file_id: &str) -> Result<Vec<DriveRevision>> {
        let file = self.get_file(file_id).await?;
        Ok(vec![DriveRevision {
            id: "1".to_string(),
            modified_time: file.modified_time,
            size: file.size,
            last_modifying_user: None,
        }])
    }

    async fn storage_quota(&self) -> Result<StorageQuota> {
        let usage: u64 = self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(_, data)| data.len() as u64)
            .sum();
        Ok(StorageQuota {
            limit: Some(15 * 1024 * 1024 * 1024),
            usage: Some(usage),
            usage_in_drive: Some(usage),
            usage_in_drive_trash: Some(0),
        })
    }

    fn root_folder_id(&self) -> &str {
        &self.root
    }
}
