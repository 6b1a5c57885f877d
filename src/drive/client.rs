use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::DriveConfig;
use crate::drive::{DriveApi, DriveContent, MultipartBody};
use crate::error::{AppError, Result};
use crate::models::{DriveFile, DriveFileList, DriveRevision, StorageQuota, FOLDER_MIME_TYPE};

const FILE_FIELDS: &str =
    "id,name,mimeType,parents,size,modifiedTime,createdTime,thumbnailLink,webViewLink,iconLink,trashed";

/// Seconds shaved off the token lifetime so it is never used at the edge
const TOKEN_EXPIRY_SKEW: u64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct RevisionList {
    #[serde(default)]
    revisions: Vec<DriveRevision>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct About {
    #[serde(default)]
    storage_quota: StorageQuota,
}

/// Drive v3 REST client authenticated with a long lived refresh token
pub struct GoogleDrive {
    http: reqwest::Client,
    config: DriveConfig,
    token: RwLock<Option<CachedToken>>,
}

impl GoogleDrive {
    pub fn new(http: reqwest::Client, config: DriveConfig) -> Self {
        Self {
            http,
            config,
            token: RwLock::new(None),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn file_url(&self, file_id: &str) -> String {
        self.api_url(&format!("/drive/v3/files/{}", urlencoding::encode(file_id)))
    }

    /// Current access token, refreshed through the OAuth token endpoint when stale
    async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.read().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut guard = self.token.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Refreshing Drive access token");
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let token: TokenResponse = check_response(response).await?.json().await?;

        let lifetime = token
            .expires_in
            .unwrap_or(3600)
            .saturating_sub(TOKEN_EXPIRY_SKEW);
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });

        Ok(token.access_token)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        check_response(response).await
    }

    fn revisions_request(&self, file_id: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/revisions", self.file_url(file_id)))
            .query(&[
                (
                    "fields",
                    "revisions(id,modifiedTime,size,lastModifyingUser(displayName,emailAddress))",
                ),
                ("supportsAllDrives", "true"),
            ])
    }

    fn file_fields() -> [(&'static str, &'static str); 2] {
        [("fields", FILE_FIELDS), ("supportsAllDrives", "true")]
    }
}

/// Map non-2xx Google responses onto application errors
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error_description"].as_str())
                .or_else(|| v["error"].as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or(body);

    Err(match status.as_u16() {
        404 => AppError::NotFound("File not found".to_string()),
        403 => {
            tracing::warn!("Drive denied request: {}", message);
            AppError::Forbidden("Drive denied access to this item".to_string())
        }
        429 => AppError::TooManyRequests(30),
        code => AppError::Drive {
            status: code,
            message,
        },
    })
}

/// Escape a value for use inside a single quoted Drive query literal
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl DriveApi for GoogleDrive {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<DriveFileList> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut params = vec![
            ("q", query),
            ("fields", fields),
            ("pageSize", page_size.to_string()),
            ("orderBy", "folder,name".to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        tracing::debug!("Drive list {} (page {:?})", folder_id, page_token);
        let request = self.http.get(self.api_url("/drive/v3/files")).query(&params);
        Ok(self.send(request).await?.json().await?)
    }

    async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        tracing::debug!("Drive get {}", file_id);
        let request = self
            .http
            .get(self.file_url(file_id))
            .query(&Self::file_fields());
        Ok(self.send(request).await?.json().await?)
    }

    async fn download(&self, file_id: &str) -> Result<DriveContent> {
        let request = self
            .http
            .get(self.file_url(file_id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        let response = self.send(request).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed();

        Ok(DriveContent {
            mime_type,
            size,
            stream,
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile> {
        let request = self
            .http
            .post(self.api_url("/drive/v3/files"))
            .query(&Self::file_fields())
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }));
        Ok(self.send(request).await?.json().await?)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        data: Bytes,
    ) -> Result<DriveFile> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        let body = MultipartBody::related(&metadata, mime_type, &data);

        let request = self
            .http
            .post(self.api_url("/upload/drive/v3/files"))
            .query(&[
                ("uploadType", "multipart"),
                ("fields", FILE_FIELDS),
                ("supportsAllDrives", "true"),
            ])
            .header(CONTENT_TYPE, body.content_type())
            .body(body.body);
        Ok(self.send(request).await?.json().await?)
    }

    async fn copy(
        &self,
        file_id: &str,
        parent_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<DriveFile> {
        let mut body = serde_json::Map::new();
        if let Some(name) = name {
            body.insert("name".to_string(), name.into());
        }
        if let Some(parent_id) = parent_id {
            body.insert("parents".to_string(), serde_json::json!([parent_id]));
        }

        let request = self
            .http
            .post(format!("{}/copy", self.file_url(file_id)))
            .query(&Self::file_fields())
            .json(&body);
        Ok(self.send(request).await?.json().await?)
    }

    async fn move_file(&self, file_id: &str, from_id: &str, to_id: &str) -> Result<DriveFile> {
        let request = self
            .http
            .patch(self.file_url(file_id))
            .query(&Self::file_fields())
            .query(&[("addParents", to_id), ("removeParents", from_id)])
            .json(&serde_json::json!({}));
        Ok(self.send(request).await?.json().await?)
    }

    async fn rename(&self, file_id: &str, name: &str) -> Result<DriveFile> {
        let request = self
            .http
            .patch(self.file_url(file_id))
            .query(&Self::file_fields())
            .json(&serde_json::json!({ "name": name }));
        Ok(self.send(request).await?.json().await?)
    }

    async fn trash(&self, file_id: &str) -> Result<()> {
        let request = self
            .http
            .patch(self.file_url(file_id))
            .query(&[("supportsAllDrives", "true")])
            .json(&serde_json::json!({ "trashed": true }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.file_url(file_id))
            .query(&[("supportsAllDrives", "true")]);
        self.send(request).await?;
        Ok(())
    }

    async fn search(&self, query: &str, page_size: u32) -> Result<Vec<DriveFile>> {
        let q = format!(
            "name contains '{}' and trashed = false",
            escape_query(query)
        );
        let fields = format!("files({})", FILE_FIELDS);
        let request = self.http.get(self.api_url("/drive/v3/files")).query(&[
            ("q", q),
            ("fields", fields),
            ("pageSize", page_size.to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
        ]);
        let list: DriveFileList = self.send(request).await?.json().await?;
        Ok(list.files)
    }

    async fn revisions(&self, file_id: &str) -> Result<Vec<DriveRevision>> {
        let request = self.revisions_request(file_id);
        let list: RevisionList = self.send(request).await?.json().await?;
        Ok(list.revisions)
    }

    async fn storage_quota(&self) -> Result<StorageQuota> {
        let request = self
            .http
            .get(self.api_url("/drive/v3/about"))
            .query(&[("fields", "storageQuota")]);
        let about: About = self.send(request).await?.json().await?;
        Ok(about.storage_quota)
    }

    fn root_folder_id(&self) -> &str {
        &self.config.root_folder_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("plain"), "plain");
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b'c"), "a\\\\b\\'c");
    }

    #[test]
    fn test_urls() {
        let drive = GoogleDrive::new(
            reqwest::Client::new(),
            DriveConfig {
                api_base: "https://drive.example.com/".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(
            drive.file_url("a/b"),
            "https://drive.example.com/drive/v3/files/a%2Fb"
        );
        assert_eq!(drive.root_folder_id(), "root");
    }

    #[test]
    fn test_revisions_cover_shared_drives() {
        let drive = GoogleDrive::new(reqwest::Client::new(), DriveConfig::default());
        let request = drive.revisions_request("f1").build().unwrap();
        assert!(request.url().path().ends_with("/drive/v3/files/f1/revisions"));
        assert!(request
            .url()
            .query_pairs()
            .any(|(k, v)| k == "supportsAllDrives" && v == "true"));
    }
}
