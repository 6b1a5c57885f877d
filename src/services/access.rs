use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::collections::HashSet;

use crate::config::Config;
use crate::db::Database;
use crate::drive::DriveApi;
use crate::error::{AppError, Result};
use crate::models::{
    CurrentUser, DriveFile, FolderClaims, FolderTokenResponse, ProtectedFolder, ShareClaims,
};
use crate::services::{AuthService, FileService, ShareService};

/// Upper bound on parent hops, Drive folders can be nested deeply but not endlessly
const MAX_LINEAGE_DEPTH: usize = 64;
const FOLDER_PURPOSE: &str = "folder";
const MIN_PASSWORD_LEN: usize = 4;

/// Credentials a request carries for the access check
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub user: Option<CurrentUser>,
    pub share_token: Option<String>,
    pub folder_tokens: Vec<String>,
    pub client_ip: Option<String>,
}

impl AccessContext {
    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_admin())
    }

    pub fn actor_email(&self) -> Option<String> {
        self.user.as_ref().map(|u| u.email.clone())
    }
}

/// Why a request was let through
#[derive(Debug, Clone)]
pub enum AccessGrant {
    Admin,
    Share(ShareClaims),
    User,
    Anonymous,
}

/// Authorization policy for Drive items
pub struct AccessService;

impl AccessService {
    /// The item followed by its ancestors, stopping at the indexed root or a parentless item
    pub async fn lineage(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
    ) -> Result<Vec<String>> {
        let root = drive.root_folder_id();
        let mut ids = vec![file_id.to_string()];
        let mut current = file_id.to_string();

        while current != root && ids.len() < MAX_LINEAGE_DEPTH {
            let file = FileService::get_file(db, config, drive, &current).await?;
            match file.parents.into_iter().next() {
                Some(parent) if !ids.contains(&parent) => {
                    ids.push(parent.clone());
                    current = parent;
                }
                _ => break,
            }
        }
        Ok(ids)
    }

    /// Lineage of an item inside the indexed tree, anything else reads as missing
    async fn indexed_lineage(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
    ) -> Result<Vec<String>> {
        let lineage = Self::lineage(db, config, drive, file_id).await?;
        if lineage.last().map(String::as_str) != Some(drive.root_folder_id()) {
            tracing::debug!("{} is outside the indexed folder", file_id);
            return Err(AppError::NotFound("File not found".to_string()));
        }
        Ok(lineage)
    }

    pub async fn protected_ids(db: &Database) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT folder_id FROM protected_folders")
            .fetch_all(db.pool())
            .await?;
        Ok(ids.into_iter().collect())
    }

    fn nearest_protected(lineage: &[String], protected: &HashSet<String>) -> Option<String> {
        lineage.iter().find(|id| protected.contains(*id)).cloned()
    }

    /// Nearest password protected folder at or above the item, `NotFound` outside the index
    pub async fn is_access_restricted(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        file_id: &str,
    ) -> Result<Option<String>> {
        let lineage = Self::indexed_lineage(db, config, drive, file_id).await?;
        let protected = Self::protected_ids(db).await?;
        Ok(Self::nearest_protected(&lineage, &protected))
    }

    /// Decide whether the request may read `file_id`
    pub async fn authorize(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        ctx: &AccessContext,
        file_id: &str,
    ) -> Result<AccessGrant> {
        if ctx.is_admin() {
            return Ok(AccessGrant::Admin);
        }

        if let Some(token) = ctx.share_token.as_deref() {
            let claims = ShareService::verify_token(db, config, token).await?;
            let lineage = Self::indexed_lineage(db, config, drive, file_id).await?;
            let target_pos = lineage
                .iter()
                .position(|id| *id == claims.target)
                .ok_or_else(|| {
                    AppError::Forbidden("Share link does not cover this item".to_string())
                })?;
            if claims.login_required && ctx.user.is_none() {
                return Err(AppError::Unauthorized(
                    "Sign in to open this share link".to_string(),
                ));
            }

            // The share unlocks its target, protected folders nested inside it stay locked
            let protected = Self::protected_ids(db).await?;
            if let Some(folder) = Self::nearest_protected(&lineage[..target_pos], &protected) {
                if !Self::holds_folder_token(config, &ctx.folder_tokens, &folder) {
                    return Err(AppError::PasswordRequired(folder));
                }
            }
            return Ok(AccessGrant::Share(claims));
        }

        if ctx.user.is_none() && config.auth.require_login {
            return Err(AppError::Unauthorized("Authentication required".to_string()));
        }

        if let Some(folder) = Self::is_access_restricted(db, config, drive, file_id).await? {
            if !Self::holds_folder_token(config, &ctx.folder_tokens, &folder) {
                tracing::debug!("{} is locked behind folder {}", file_id, folder);
                return Err(AppError::PasswordRequired(folder));
            }
        }

        Ok(match ctx.user {
            Some(_) => AccessGrant::User,
            None => AccessGrant::Anonymous,
        })
    }

    /// Whether a folder may be descended into without a password prompt
    pub fn can_enter(
        config: &Config,
        ctx: &AccessContext,
        protected: &HashSet<String>,
        folder_id: &str,
    ) -> bool {
        ctx.is_admin()
            || !protected.contains(folder_id)
            || Self::holds_folder_token(config, &ctx.folder_tokens, folder_id)
    }

    /// Drop items the visitor could not open
    pub async fn filter_visible(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        ctx: &AccessContext,
        files: Vec<DriveFile>,
    ) -> Result<Vec<DriveFile>> {
        if ctx.is_admin() {
            return Ok(files);
        }

        let protected = Self::protected_ids(db).await?;
        let lineages = join_all(
            files
                .iter()
                .map(|file| Self::indexed_lineage(db, config, drive, &file.id)),
        )
        .await;

        Ok(files
            .into_iter()
            .zip(lineages)
            .filter_map(|(file, lineage)| match lineage {
                Ok(lineage) => match Self::nearest_protected(&lineage, &protected) {
                    Some(folder) if !Self::holds_folder_token(config, &ctx.folder_tokens, &folder) => None,
                    _ => Some(file),
                },
                Err(e) => {
                    tracing::debug!("Hiding {} from results: {}", file.id, e);
                    None
                }
            })
            .collect())
    }

    /// Keep the ids the visitor is allowed to open
    pub async fn visible_ids(
        db: &Database,
        config: &Config,
        drive: &dyn DriveApi,
        ctx: &AccessContext,
        ids: Vec<String>,
    ) -> Vec<String> {
        let grants = join_all(
            ids.iter()
                .map(|id| Self::authorize(db, config, drive, ctx, id)),
        )
        .await;

        ids.into_iter()
            .zip(grants)
            .filter_map(|(id, grant)| grant.ok().map(|_| id))
            .collect()
    }

    pub fn issue_folder_token(config: &Config, folder_id: &str) -> Result<FolderTokenResponse> {
        let now = Utc::now();
        let expires_in = config.jwt.folder_token_expire_minutes * 60;
        let claims = FolderClaims {
            folder_id: folder_id.to_string(),
            purpose: FOLDER_PURPOSE.to_string(),
            exp: (now + Duration::seconds(expires_in as i64)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        Ok(FolderTokenResponse {
            folder_id: folder_id.to_string(),
            token: AuthService::sign(config, &claims)?,
            expires_in,
        })
    }

    /// Folder id a token unlocks, if it is valid
    pub fn verify_folder_token(config: &Config, token: &str) -> Option<String> {
        AuthService::decode_claims::<FolderClaims>(config, token)
            .filter(|c| c.purpose == FOLDER_PURPOSE)
            .map(|c| c.folder_id)
    }

    pub fn holds_folder_token(config: &Config, tokens: &[String], folder_id: &str) -> bool {
        tokens
            .iter()
            .filter_map(|t| Self::verify_folder_token(config, t))
            .any(|id| id == folder_id)
    }

    /// Check the folder's access id and password, returning an unlock token
    pub async fn unlock_folder(
        db: &Database,
        config: &Config,
        folder_id: &str,
        access_id: &str,
        password: &str,
    ) -> Result<FolderTokenResponse> {
        let record = Self::get_protected(db, folder_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Folder is not protected".to_string()))?;

        if record.access_id != access_id.trim() || !Self::verify_password(password, &record.password_hash)? {
            return Err(AppError::Unauthorized("Invalid credentials".to_string()));
        }

        Self::issue_folder_token(config, folder_id)
    }

    pub async fn get_protected(db: &Database, folder_id: &str) -> Result<Option<ProtectedFolder>> {
        let record = sqlx::query_as("SELECT * FROM protected_folders WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(record)
    }

    pub async fn list_protected(db: &Database) -> Result<Vec<ProtectedFolder>> {
        let records = sqlx::query_as("SELECT * FROM protected_folders ORDER BY created_at")
            .fetch_all(db.pool())
            .await?;
        Ok(records)
    }

    /// Create or replace the password gate of a folder
    pub async fn protect_folder(
        db: &Database,
        folder_id: &str,
        access_id: &str,
        password: &str,
    ) -> Result<ProtectedFolder> {
        let folder_id = folder_id.trim();
        let access_id = access_id.trim();
        if folder_id.is_empty() || access_id.is_empty() {
            return Err(AppError::BadRequest("Folder id and access id are required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::BadRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password_hash = Self::hash_password(password)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO protected_folders (folder_id, access_id, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(folder_id) DO UPDATE SET
                access_id = excluded.access_id,
                password_hash = excluded.password_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(folder_id)
        .bind(access_id)
        .bind(&password_hash)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        Self::get_protected(db, folder_id)
            .await?
            .ok_or_else(|| AppError::Internal("Protected folder vanished".to_string()))
    }

    pub async fn unprotect_folder(db: &Database, folder_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM protected_folders WHERE folder_id = ?")
            .bind(folder_id)
            .execute(db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Folder is not protected".to_string()));
        }
        Ok(())
    }

    fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
