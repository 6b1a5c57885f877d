use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub file_id: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFavoriteRequest {
    pub file_id: String,
    pub name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TagQuery {
    pub tag: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTags {
    pub file_id: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedFolder {
    pub folder_id: String,
    pub name: String,
    pub position: i64,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinFolderRequest {
    pub folder_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PurgeCacheRequest {
    pub pattern: Option<String>,
}
