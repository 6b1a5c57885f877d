use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Password gate on a Drive folder and everything below it
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedFolder {
    pub folder_id: String,
    #[serde(rename = "id")]
    pub access_id: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectFolderRequest {
    pub folder_id: String,
    pub id: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockFolderRequest {
    pub folder_id: String,
    pub id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderTokenResponse {
    pub folder_id: String,
    pub token: String,
    pub expires_in: u64,
}

/// Claims of a folder unlock token
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderClaims {
    pub folder_id: String,
    pub purpose: String,
    pub exp: usize,
    pub iat: usize,
}
