use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};

/// Fixed-window request counters kept in SQLite
pub struct RateLimitService;

impl RateLimitService {
    /// Count a hit for `key`, failing once `limit` is exceeded in the current window
    pub async fn hit(db: &Database, key: &str, limit: u32, window_seconds: u64) -> Result<u32> {
        Self::hit_at(db, key, limit, window_seconds, Utc::now().timestamp()).await
    }

    async fn hit_at(
        db: &Database,
        key: &str,
        limit: u32,
        window_seconds: u64,
        now: i64,
    ) -> Result<u32> {
        let window = window_seconds.max(1) as i64;
        let window_start = now / window * window;

        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (key, window_start, count) VALUES (?, ?, 1)
            ON CONFLICT(key) DO UPDATE SET
                count = CASE WHEN rate_limits.window_start = excluded.window_start
                    THEN rate_limits.count + 1 ELSE 1 END,
                window_start = excluded.window_start
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(window_start)
        .fetch_one(db.pool())
        .await?;

        if count > limit as i64 {
            let retry_after = (window_start + window - now).max(1) as u64;
            tracing::warn!("Rate limit exceeded for {}", key);
            return Err(AppError::TooManyRequests(retry_after));
        }
        Ok(count as u32)
    }

    /// Drop counters whose window has passed
    pub async fn purge(db: &Database, window_seconds: u64) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - window_seconds as i64;
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < ?")
            .bind(cutoff)
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
