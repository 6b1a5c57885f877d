use serde::{Deserialize, Deserializer, Serialize};

use crate::format::format_bytes;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// Drive file resource, as returned by the Drive v3 API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub thumbnail_link: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub icon_link: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Google Docs, Sheets and friends have no binary content to download
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_APPS_PREFIX)
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Drive encodes int64 fields as JSON strings
fn de_opt_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriveFileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRevision {
    pub id: String,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modifying_user: Option<RevisionUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuota {
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub usage: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub usage_in_drive: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub usage_in_drive_trash: Option<u64>,
}

/// File entry sent to the browsing UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub parents: Vec<String>,
    pub is_folder: bool,
    pub is_protected: bool,
    pub size: Option<u64>,
    pub size_formatted: Option<String>,
    pub modified_time: Option<String>,
    pub created_time: Option<String>,
    pub thumbnail_link: Option<String>,
    pub web_view_link: Option<String>,
    pub icon_link: Option<String>,
}

impl From<DriveFile> for FileResponse {
    fn from(file: DriveFile) -> Self {
        Self {
            is_folder: file.is_folder(),
            is_protected: false,
            size_formatted: file.size.map(format_bytes),
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            parents: file.parents,
            size: file.size,
            modified_time: file.modified_time,
            created_time: file.created_time,
            thumbnail_link: file.thumbnail_link,
            web_view_link: file.web_view_link,
            icon_link: file.icon_link,
        }
    }
}

/// File list response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub next_page_token: Option<String>,
}

/// Storage quota with human readable sizes
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageResponse {
    pub limit: Option<u64>,
    pub usage: Option<u64>,
    pub usage_in_drive: Option<u64>,
    pub usage_in_drive_trash: Option<u64>,
    pub limit_formatted: Option<String>,
    pub usage_formatted: Option<String>,
    pub percent_used: Option<f64>,
}

impl From<StorageQuota> for StorageResponse {
    fn from(quota: StorageQuota) -> Self {
        let percent_used = match (quota.usage, quota.limit) {
            (Some(usage), Some(limit)) if limit > 0 => {
                Some(((usage as f64 / limit as f64) * 1000.0).round() / 10.0)
            }
            _ => None,
        };
        Self {
            limit: quota.limit,
            usage: quota.usage,
            usage_in_drive: quota.usage_in_drive,
            usage_in_drive_trash: quota.usage_in_drive_trash,
            limit_formatted: quota.limit.map(format_bytes),
            usage_formatted: quota.usage.map(format_bytes),
            percent_used,
        }
    }
}

/// File query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub folder_id: Option<String>,
    pub page_token: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub parent_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFileRequest {
    pub parent_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveFilesRequest {
    pub file_ids: Vec<String>,
    pub from_id: String,
    pub to_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesRequest {
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of an operation applied to several files at once
#[derive(Debug, Serialize, Default)]
pub struct BulkResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_file_parses_string_sizes() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"a.png","mimeType":"image/png","parents":["p"],"size":"2048"}"#,
        )
        .unwrap();
        assert_eq!(file.size, Some(2048));
        assert!(file.is_image());
        assert!(!file.is_folder());
    }

    #[test]
    fn test_folder_response_has_no_size() {
        let file: DriveFile = serde_json::from_str(&format!(
            r#"{{"id":"f","name":"Docs","mimeType":"{}"}}"#,
            FOLDER_MIME_TYPE
        ))
        .unwrap();
        let response = FileResponse::from(file);
        assert!(response.is_folder);
        assert!(response.parents.is_empty());
        assert_eq!(response.size_formatted, None);
    }

    #[test]
    fn test_storage_percent() {
        let quota = StorageQuota {
            limit: Some(1000),
            usage: Some(333),
            ..Default::default()
        };
        let response = StorageResponse::from(quota);
        assert_eq!(response.percent_used, Some(33.3));

        let unlimited = StorageResponse::from(StorageQuota {
            usage: Some(5),
            ..Default::default()
        });
        assert_eq!(unlimited.percent_used, None);
    }
}
