use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use crate::db::Database;
use crate::error::{AppError, Result};

/// TTL cache over the `cache_entries` table
pub struct CacheService;

impl CacheService {
    pub fn file_key(file_id: &str) -> String {
        format!("drive:file:{}", file_id)
    }

    pub fn listing_key(folder_id: &str, page_token: Option<&str>, page_size: u32) -> String {
        format!(
            "drive:list:{}:{}:{}",
            folder_id,
            page_token.unwrap_or("first"),
            page_size
        )
    }

    /// Pattern matching every cached page of a folder listing
    pub fn listing_pattern(folder_id: &str) -> String {
        format!("drive:list:{}:*", folder_id)
    }

    pub async fn get<T: DeserializeOwned>(db: &Database, key: &str) -> Result<Option<T>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Utc::now().timestamp())
                .fetch_optional(db.pool())
                .await?;

        match value {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(v) => {
                    tracing::debug!("Cache hit {}", key);
                    Ok(Some(v))
                }
                Err(e) => {
                    tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                    Self::invalidate(db, key).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(db: &Database, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| AppError::Internal(format!("Cache encode failed: {}", e)))?;
        let expires_at = Utc::now().timestamp() + ttl_seconds as i64;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(expires_at)
        .execute(db.pool())
        .await?;
        Ok(())
    }

    pub async fn invalidate(db: &Database, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(db.pool())
            .await?;
        Ok(())
    }

    /// Delete every key matching a glob where `*` matches any run of characters
    pub async fn invalidate_pattern(db: &Database, pattern: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key GLOB ?")
            .bind(to_sqlite_glob(pattern))
            .execute(db.pool())
            .await?;

        tracing::debug!("Invalidated {} cache keys matching {}", result.rows_affected(), pattern);
        Ok(result.rows_affected())
    }

    pub async fn purge_expired(db: &Database) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

/// Keep `*` as the only wildcard, SQLite GLOB would also honour `?` and `[`
fn to_sqlite_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 4);
    for c in pattern.chars() {
        match c {
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            _ => glob.push(c),
        }
    }
    glob
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sqlite_glob() {
        assert_eq!(to_sqlite_glob("drive:list:abc:*"), "drive:list:abc:*");
        assert_eq!(to_sqlite_glob("a?b[c"), "a[?]b[[]c");
    }

    #[tokio::test]
    async fn test_set_get_roundtrip_and_expiry() {
        let db = Database::in_memory().await;
        CacheService::set(&db, "k1", &vec![1, 2, 3], 60).await.unwrap();
        let hit: Option<Vec<i32>> = CacheService::get(&db, "k1").await.unwrap();
        assert_eq!(hit, Some(vec![1, 2, 3]));

        CacheService::set(&db, "k2", &"stale", 0).await.unwrap();
        let miss: Option<String> = CacheService::get(&db, "k2").await.unwrap();
        assert_eq!(miss, None);
        assert_eq!(CacheService::purge_expired(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_only_hits_matching_keys() {
        let db = Database::in_memory().await;
        let listing_a = CacheService::listing_key("folder_a", None, 50);
        let listing_a2 = CacheService::listing_key("folder_a", Some("p2"), 50);
        let listing_b = CacheService::listing_key("FOLDER_A", None, 50);
        for key in [&listing_a, &listing_a2, &listing_b] {
            CacheService::set(&db, key, &1, 60).await.unwrap();
        }

        let removed = CacheService::invalidate_pattern(&db, &CacheService::listing_pattern("folder_a"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let kept: Option<i32> = CacheService::get(&db, &listing_b).await.unwrap();
        assert_eq!(kept, Some(1));
    }
}
