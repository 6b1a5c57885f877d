use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{User, UserResponse, UserRole};
use crate::services::AuthService;

/// User administration
pub struct UserService;

impl UserService {
    /// Get all users
    pub async fn list_users(db: &Database) -> Result<Vec<UserResponse>> {
        let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY created_at, email")
            .fetch_all(db.pool())
            .await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    /// Change a user's role, their sessions are invalidated
    pub async fn update_user_role(
        db: &Database,
        user_id: &str,
        role: UserRole,
    ) -> Result<UserResponse> {
        let result = sqlx::query(
            "UPDATE users SET role = ?, token_version = token_version + 1, updated_at = ? WHERE id = ?",
        )
        .bind(role.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        Ok(UserResponse::from(AuthService::get_user(db, user_id).await?))
    }

    /// Enable or disable an account, their sessions are invalidated
    pub async fn update_user_status(
        db: &Database,
        user_id: &str,
        is_active: bool,
    ) -> Result<UserResponse> {
        let result = sqlx::query(
            "UPDATE users SET is_active = ?, token_version = token_version + 1, updated_at = ? WHERE id = ?",
        )
        .bind(is_active)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(db.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        Ok(UserResponse::from(AuthService::get_user(db, user_id).await?))
    }
}
