use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::format::format_duration;
use crate::models::{
    CreateShareRequest, CurrentUser, ShareClaims, ShareInfo, ShareKind, ShareLink,
    ShareLinkResponse, ShareTarget,
};
use crate::services::AuthService;

pub struct ShareService;

impl ShareService {
    /// Lifetime requested by the client, bounded by the configured maximum
    fn share_lifetime(config: &Config, req: &CreateShareRequest) -> Result<Duration> {
        let requested = match req.kind {
            ShareKind::Session => Duration::from_secs(config.jwt.session_expire_hours * 3600),
            ShareKind::Timed => match req.expires_in.as_deref().map(str::trim) {
                Some(raw) if !raw.is_empty() => humantime::parse_duration(raw).map_err(|_| {
                    AppError::BadRequest(format!("Invalid expiry duration: {}", raw))
                })?,
                _ => config.share.default_expire(),
            },
        };

        if requested.as_secs() == 0 {
            return Err(AppError::BadRequest("Expiry must be positive".to_string()));
        }
        Ok(requested.min(config.share.max_expire()))
    }

    /// Create a signed share link
    pub async fn create_share(
        db: &Database,
        config: &Config,
        user: &CurrentUser,
        req: CreateShareRequest,
    ) -> Result<ShareLinkResponse> {
        let target = ShareTarget::parse(&req.path)
            .ok_or_else(|| AppError::BadRequest("Invalid share path".to_string()))?;
        let path = req
            .path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string();
        let item_name = req.item_name.trim().to_string();
        if item_name.is_empty() {
            return Err(AppError::BadRequest("Item name is required".to_string()));
        }

        let lifetime = Self::share_lifetime(config, &req)?;
        // Session shares only make sense for signed-in visitors
        let login_required = req.login_required || req.kind == ShareKind::Session;

        let now = Utc::now().timestamp();
        let expires_at = now + lifetime.as_secs() as i64;
        let claims = ShareClaims {
            jti: Uuid::new_v4().to_string(),
            path: path.clone(),
            target: target.id().to_string(),
            login_required,
            sub: user.email.clone(),
            exp: expires_at as usize,
            iat: now as usize,
        };
        let token = AuthService::sign(config, &claims)?;

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO share_links (id, jti, path, target_id, item_name, token, created_by, login_required, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&claims.jti)
        .bind(&path)
        .bind(&claims.target)
        .bind(&item_name)
        .bind(&token)
        .bind(&user.id)
        .bind(login_required)
        .bind(expires_at)
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await?;

        tracing::info!("{} shared {} until {}", user.email, path, expires_at);

        Ok(ShareLinkResponse {
            url: Self::share_url(config, &path, &token),
            id,
            token,
            path,
            item_name,
            login_required,
            expires_at,
            expires_in: format_duration(lifetime.as_secs()),
        })
    }

    fn share_url(config: &Config, path: &str, token: &str) -> String {
        format!(
            "{}{}?share_token={}",
            config.server.public_url.trim_end_matches('/'),
            path,
            token
        )
    }

    pub async fn get_share(db: &Database, id: &str) -> Result<ShareLink> {
        sqlx::query_as("SELECT * FROM share_links WHERE id = ?")
            .bind(id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))
    }

    /// Live links, admins see everyone's
    pub async fn list_shares(db: &Database, user: &CurrentUser) -> Result<Vec<ShareLink>> {
        let now = Utc::now().timestamp();
        let links = if user.is_admin() {
            sqlx::query_as("SELECT * FROM share_links WHERE expires_at > ? ORDER BY created_at DESC")
                .bind(now)
                .fetch_all(db.pool())
                .await?
        } else {
            sqlx::query_as(
                "SELECT * FROM share_links WHERE created_by = ? AND expires_at > ? ORDER BY created_at DESC",
            )
            .bind(&user.id)
            .bind(now)
            .fetch_all(db.pool())
            .await?
        };
        Ok(links)
    }

    /// Blocklist the token for the rest of its lifetime and drop the link
    pub async fn revoke_share(db: &Database, user: &CurrentUser, id: &str) -> Result<ShareLink> {
        let link = Self::get_share(db, id).await?;
        if link.created_by != user.id && !user.is_admin() {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let mut tx = db.pool().begin().await?;
        sqlx::query("INSERT INTO revoked_tokens (jti, expires_at) VALUES (?, ?) ON CONFLICT(jti) DO NOTHING")
            .bind(&link.jti)
            .bind(link.expires_at)
            .execute(tx.as_mut())
            .await?;
        sqlx::query("DELETE FROM share_links WHERE id = ?")
            .bind(&link.id)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;

        tracing::info!("{} revoked share {}", user.email, link.path);
        Ok(link)
    }

    pub async fn is_revoked(db: &Database, jti: &str) -> Result<bool> {
        let hit: Option<String> =
            sqlx::query_scalar("SELECT jti FROM revoked_tokens WHERE jti = ? AND expires_at > ?")
                .bind(jti)
                .bind(Utc::now().timestamp())
                .fetch_optional(db.pool())
                .await?;
        Ok(hit.is_some())
    }

    /// Signature, expiry and blocklist check
    pub async fn verify_token(db: &Database, config: &Config, token: &str) -> Result<ShareClaims> {
        let claims: ShareClaims = AuthService::decode_claims(config, token).ok_or_else(|| {
            tracing::warn!("Rejected invalid or expired share token");
            AppError::Forbidden("Invalid or expired share link".to_string())
        })?;

        if Self::is_revoked(db, &claims.jti).await? {
            tracing::warn!("Rejected revoked share token {}", claims.jti);
            return Err(AppError::Forbidden("Share link has been revoked".to_string()));
        }
        Ok(claims)
    }

    pub fn share_info(claims: &ShareClaims) -> ShareInfo {
        ShareInfo {
            path: claims.path.clone(),
            target_id: claims.target.clone(),
            login_required: claims.login_required,
            expires_at: claims.exp as i64,
        }
    }

    /// Drop expired links and blocklist entries
    pub async fn purge_expired(db: &Database) -> Result<u64> {
        let now = Utc::now().timestamp();
        let links = sqlx::query("DELETE FROM share_links WHERE expires_at <= ?")
            .bind(now)
            .execute(db.pool())
            .await?;
        let revoked = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(db.pool())
            .await?;
        Ok(links.rows_affected() + revoked.rows_affected())
    }
}
