use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::drive::check_response;
use crate::error::{AppError, Result};
use crate::models::{
    CurrentUser, GoogleProfile, LoginResponse, MfaClaims, SessionClaims, User, UserResponse,
    UserRole,
};
use crate::services::TwoFactorService;

const MFA_PURPOSE: &str = "mfa";

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

/// Authentication service
pub struct AuthService;

impl AuthService {
    /// Sign any claim set with the current secret
    pub fn sign<T: Serialize>(config: &Config, claims: &T) -> Result<String> {
        let token = encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(config.jwt.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Decode a token signed with the current or a previous secret
    pub fn decode_claims<T: DeserializeOwned>(config: &Config, token: &str) -> Option<T> {
        let validation = Validation::default();
        let keys = std::iter::once(config.jwt.secret.as_str())
            .chain(config.jwt.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(data) = decode::<T>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Some(data.claims);
            }
        }
        None
    }

    /// Random value bound to the consent redirect
    pub fn new_oauth_state() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// Google consent screen URL
    pub fn authorize_url(config: &Config, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &config.oauth.auth_url,
            &[
                ("client_id", config.oauth.client_id.as_str()),
                ("redirect_uri", config.oauth.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
                ("prompt", "select_account"),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Invalid OAuth URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// Trade an authorization code for the Google profile of the signed-in account
    pub async fn exchange_code(
        http: &reqwest::Client,
        config: &Config,
        code: &str,
    ) -> Result<GoogleProfile> {
        let response = http
            .post(&config.oauth.token_url)
            .form(&[
                ("code", code),
                ("client_id", config.oauth.client_id.as_str()),
                ("client_secret", config.oauth.client_secret.as_str()),
                ("redirect_uri", config.oauth.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;
        let token: OAuthTokenResponse = check_response(response)
            .await
            .map_err(|e| {
                tracing::warn!("OAuth code exchange failed: {}", e);
                AppError::Unauthorized("Sign-in failed".to_string())
            })?
            .json()
            .await?;

        let response = http
            .get(&config.oauth.userinfo_url)
            .bearer_auth(token.access_token)
            .send()
            .await?;
        Ok(check_response(response).await?.json().await?)
    }

    /// Create or refresh the local user for a Google profile
    pub async fn sign_in(db: &Database, config: &Config, profile: GoogleProfile) -> Result<User> {
        let email = profile.email.trim().to_lowercase();
        if profile.email_verified == Some(false) {
            return Err(AppError::Forbidden("Email address is not verified".to_string()));
        }
        if !config.auth.is_email_allowed(&email) {
            tracing::warn!("Rejected sign-in from {}", email);
            return Err(AppError::Forbidden("This account is not allowed".to_string()));
        }

        let name = profile
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let now = Utc::now().to_rfc3339();

        let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(db.pool())
            .await?;

        let user_id = match existing {
            Some(user) => {
                if !user.is_active {
                    return Err(AppError::Forbidden("Account is disabled".to_string()));
                }
                // Listed admins are promoted, never demoted here
                let role = if config.auth.is_admin_email(&email) {
                    UserRole::Admin.as_str().to_string()
                } else {
                    user.role
                };
                sqlx::query(
                    "UPDATE users SET name = ?, image = ?, role = ?, last_login_at = ?, updated_at = ? WHERE id = ?",
                )
                .bind(&name)
                .bind(&profile.picture)
                .bind(&role)
                .bind(&now)
                .bind(&now)
                .bind(&user.id)
                .execute(db.pool())
                .await?;
                user.id
            }
            None => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                    .fetch_one(db.pool())
                    .await?;
                let role = if count == 0 || config.auth.is_admin_email(&email) {
                    UserRole::Admin
                } else {
                    UserRole::User
                };

                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO users (id, email, name, image, role, last_login_at, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&email)
                .bind(&name)
                .bind(&profile.picture)
                .bind(role.as_str())
                .bind(&now)
                .bind(&now)
                .bind(&now)
                .execute(db.pool())
                .await?;
                tracing::info!("Created {} account for {}", role.as_str(), email);
                id
            }
        };

        Self::get_user(db, &user_id).await
    }

    /// Session, or a pending second factor when TOTP is on
    pub fn complete_login(config: &Config, user: User) -> Result<LoginResponse> {
        if user.totp_enabled != 0 {
            return Ok(LoginResponse {
                mfa_required: true,
                mfa_token: Some(Self::issue_mfa_token(config, &user.id)?),
                session_token: None,
                expires_in: config.jwt.mfa_token_expire_minutes * 60,
                user: None,
            });
        }

        Ok(LoginResponse {
            mfa_required: false,
            mfa_token: None,
            session_token: Some(Self::issue_session(config, &user)?),
            expires_in: config.jwt.session_expire_hours * 3600,
            user: Some(UserResponse::from(user)),
        })
    }

    /// Second step of a TOTP protected sign-in
    pub async fn login_2fa(
        db: &Database,
        config: &Config,
        mfa_token: &str,
        code: &str,
    ) -> Result<LoginResponse> {
        let claims: MfaClaims = Self::decode_claims(config, mfa_token)
            .filter(|c: &MfaClaims| c.purpose == MFA_PURPOSE)
            .ok_or_else(|| AppError::Unauthorized("Sign-in attempt expired".to_string()))?;

        TwoFactorService::verify_totp_for_user(db, config, &claims.sub, code).await?;

        let user = Self::get_user(db, &claims.sub).await?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }

        Ok(LoginResponse {
            mfa_required: false,
            mfa_token: None,
            session_token: Some(Self::issue_session(config, &user)?),
            expires_in: config.jwt.session_expire_hours * 3600,
            user: Some(UserResponse::from(user)),
        })
    }

    pub fn issue_session(config: &Config, user: &User) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(config.jwt.session_expire_hours as i64);

        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            ver: user.token_version,
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        Self::sign(config, &claims)
    }

    fn issue_mfa_token(config: &Config, user_id: &str) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(config.jwt.mfa_token_expire_minutes as i64);
        let claims = MfaClaims {
            sub: user_id.to_string(),
            purpose: MFA_PURPOSE.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        Self::sign(config, &claims)
    }

    /// Validate session token and extract claims
    pub fn validate_token(config: &Config, token: &str) -> Result<SessionClaims> {
        Self::decode_claims(config, token)
            .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
    }

    /// Resolve a session token to a live account
    pub async fn authenticate(db: &Database, config: &Config, token: &str) -> Result<CurrentUser> {
        let claims = Self::validate_token(config, token)?;

        let row: Option<(String, String, bool, i64)> =
            sqlx::query_as("SELECT email, role, is_active, token_version FROM users WHERE id = ?")
                .bind(&claims.sub)
                .fetch_optional(db.pool())
                .await?;
        let (email, role, is_active, token_version) =
            row.ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

        if !is_active {
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }
        if token_version != claims.ver {
            return Err(AppError::Unauthorized("Session expired".to_string()));
        }

        Ok(CurrentUser {
            id: claims.sub,
            email,
            role: UserRole::from_str(&role),
        })
    }

    /// Invalidate every session of the user
    pub async fn logout(db: &Database, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE users SET token_version = token_version + 1, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(user_id)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    pub async fn get_user(db: &Database, user_id: &str) -> Result<User> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.jwt.secret = "test-secret-for-zee-index".to_string();
        config
    }

    pub fn profile(email: &str) -> GoogleProfile {
        GoogleProfile {
            email: email.to_string(),
            email_verified: Some(true),
            name: Some("Tester".to_string()),
            picture: None,
        }
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin() {
        let db = Database::in_memory().await;
        let config = test_config();

        let first = AuthService::sign_in(&db, &config, profile("First@Example.com"))
            .await
            .unwrap();
        assert_eq!(first.email, "first@example.com");
        assert!(first.is_admin());

        let second = AuthService::sign_in(&db, &config, profile("second@example.com"))
            .await
            .unwrap();
        assert!(!second.is_admin());
    }

    #[tokio::test]
    async fn test_sign_in_respects_allow_list() {
        let db = Database::in_memory().await;
        let mut config = test_config();
        config.auth.allowed_emails = vec!["ok@example.com".to_string()];

        let err = AuthService::sign_in(&db, &config, profile("nope@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(AuthService::sign_in(&db, &config, profile("ok@example.com"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_logout() {
        let db = Database::in_memory().await;
        let config = test_config();
        let user = AuthService::sign_in(&db, &config, profile("a@example.com"))
            .await
            .unwrap();

        let login = AuthService::complete_login(&config, user.clone()).unwrap();
        assert!(!login.mfa_required);
        let token = login.session_token.unwrap();

        let current = AuthService::authenticate(&db, &config, &token).await.unwrap();
        assert_eq!(current.id, user.id);
        assert!(current.is_admin());

        AuthService::logout(&db, &user.id).await.unwrap();
        let err = AuthService::authenticate(&db, &config, &token).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_previous_secret_still_validates() {
        let db = Database::in_memory().await;
        let old = test_config();
        let user = AuthService::sign_in(&db, &old, profile("a@example.com"))
            .await
            .unwrap();
        let token = AuthService::issue_session(&old, &user).unwrap();

        let mut rotated = test_config();
        rotated.jwt.secret = "a-brand-new-secret".to_string();
        assert!(AuthService::validate_token(&rotated, &token).is_err());

        rotated.jwt.previous_secrets = vec![old.jwt.secret.clone()];
        assert!(AuthService::validate_token(&rotated, &token).is_ok());
    }

    #[tokio::test]
    async fn test_mfa_token_is_not_a_session() {
        let db = Database::in_memory().await;
        let config = test_config();
        let user = AuthService::sign_in(&db, &config, profile("a@example.com"))
            .await
            .unwrap();
        let mfa = AuthService::issue_mfa_token(&config, &user.id).unwrap();
        assert!(AuthService::validate_token(&config, &mfa).is_err());
    }

    #[test]
    fn test_authorize_url_carries_state() {
        let mut config = test_config();
        config.oauth.client_id = "client-1".to_string();
        let url = AuthService::authorize_url(&config, "xyz").unwrap();
        assert!(url.starts_with(&config.oauth.auth_url));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("response_type=code"));
    }
}
