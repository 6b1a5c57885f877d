use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Favorite, FileTags, PinnedFolder, TagCount};

const MAX_TAGS: usize = 20;
const MAX_TAG_LEN: usize = 32;

/// Favorites, tags and pinned folders
pub struct MetadataService;

impl MetadataService {
    pub async fn list_favorites(db: &Database, user_id: &str) -> Result<Vec<Favorite>> {
        let favorites = sqlx::query_as(
            "SELECT file_id, name, mime_type, created_at FROM favorites WHERE user_id = ? ORDER BY created_at DESC, name",
        )
        .bind(user_id)
        .fetch_all(db.pool())
        .await?;
        Ok(favorites)
    }

    pub async fn add_favorite(
        db: &Database,
        user_id: &str,
        file_id: &str,
        name: &str,
        mime_type: Option<&str>,
    ) -> Result<Favorite> {
        if file_id.trim().is_empty() {
            return Err(AppError::BadRequest("File id is required".to_string()));
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO favorites (user_id, file_id, name, mime_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, file_id) DO UPDATE SET name = excluded.name, mime_type = excluded.mime_type
            "#,
        )
        .bind(user_id)
        .bind(file_id)
        .bind(name.trim())
        .bind(mime_type)
        .bind(&now)
        .execute(db.pool())
        .await?;

        let favorite = sqlx::query_as(
            "SELECT file_id, name, mime_type, created_at FROM favorites WHERE user_id = ? AND file_id = ?",
        )
        .bind(user_id)
        .bind(file_id)
        .fetch_one(db.pool())
        .await?;
        Ok(favorite)
    }

    pub async fn remove_favorite(db: &Database, user_id: &str, file_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND file_id = ?")
            .bind(user_id)
            .bind(file_id)
            .execute(db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Favorite not found".to_string()));
        }
        Ok(())
    }

    /// Trimmed, lowercased and deduplicated, keeping first-seen order
    pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
        let mut normalized: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() || normalized.contains(&tag) {
                continue;
            }
            if tag.chars().count() > MAX_TAG_LEN {
                return Err(AppError::BadRequest(format!(
                    "Tags cannot exceed {} characters",
                    MAX_TAG_LEN
                )));
            }
            normalized.push(tag);
        }
        if normalized.len() > MAX_TAGS {
            return Err(AppError::BadRequest(format!(
                "A file can carry at most {} tags",
                MAX_TAGS
            )));
        }
        Ok(normalized)
    }

    pub async fn get_tags(db: &Database, file_id: &str) -> Result<FileTags> {
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM file_tags WHERE file_id = ? ORDER BY tag")
                .bind(file_id)
                .fetch_all(db.pool())
                .await?;
        Ok(FileTags {
            file_id: file_id.to_string(),
            tags,
        })
    }

    /// Replace the tag set of a file
    pub async fn set_tags(db: &Database, file_id: &str, tags: &[String]) -> Result<FileTags> {
        let tags = Self::normalize_tags(tags)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = db.pool().begin().await?;
        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(file_id)
            .execute(tx.as_mut())
            .await?;
        for tag in &tags {
            sqlx::query("INSERT INTO file_tags (file_id, tag, created_at) VALUES (?, ?, ?)")
                .bind(file_id)
                .bind(tag)
                .bind(&now)
                .execute(tx.as_mut())
                .await?;
        }
        tx.commit().await?;

        Self::get_tags(db, file_id).await
    }

    pub async fn files_with_tag(db: &Database, tag: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT file_id FROM file_tags WHERE tag = ? ORDER BY created_at, file_id")
            .bind(tag.trim().to_lowercase())
            .fetch_all(db.pool())
            .await?;
        Ok(ids)
    }

    pub async fn tag_counts(db: &Database) -> Result<Vec<TagCount>> {
        let counts = sqlx::query_as(
            "SELECT tag, COUNT(*) AS count FROM file_tags GROUP BY tag ORDER BY count DESC, tag",
        )
        .fetch_all(db.pool())
        .await?;
        Ok(counts)
    }

    pub async fn list_pins(db: &Database) -> Result<Vec<PinnedFolder>> {
        let pins = sqlx::query_as("SELECT * FROM pinned_folders ORDER BY position, created_at")
            .fetch_all(db.pool())
            .await?;
        Ok(pins)
    }

    /// Pin a folder at the end, re-pinning only renames it
    pub async fn pin_folder(
        db: &Database,
        folder_id: &str,
        name: &str,
        created_by: &str,
    ) -> Result<PinnedFolder> {
        let name = name.trim();
        if folder_id.trim().is_empty() || name.is_empty() {
            return Err(AppError::BadRequest("Folder id and name are required".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO pinned_folders (folder_id, name, position, created_by, created_at)
            VALUES (?, ?, (SELECT COALESCE(MAX(position), -1) + 1 FROM pinned_folders), ?, ?)
            ON CONFLICT(folder_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(folder_id)
        .bind(name)
        .bind(created_by)
        .bind(Utc::now().to_rfc3339())
        .execute(db.pool())
        .await?;

        let pin = sqlx::query_as("SELECT * FROM pinned_folders WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_one(db.pool())
            .await?;
        Ok(pin)
    }

    pub async fn unpin_folder(db: &Database, folder_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM pinned_folders WHERE folder_id = ?")
            .bind(folder_id)
            .execute(db.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Pin not found".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn with_user(db: &Database, id: &str) {
        sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
            .bind(id)
            .bind(format!("{}@example.com", id))
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " Travel ".to_string(),
            "travel".to_string(),
            "".to_string(),
            "2024".to_string(),
        ];
        assert_eq!(
            MetadataService::normalize_tags(&tags).unwrap(),
            vec!["travel", "2024"]
        );
        assert!(MetadataService::normalize_tags(&["x".repeat(33)]).is_err());

        let many: Vec<String> = (0..21).map(|i| format!("t{}", i)).collect();
        assert!(MetadataService::normalize_tags(&many).is_err());
        assert!(MetadataService::normalize_tags(&many[..20]).is_ok());
    }

    #[tokio::test]
    async fn test_favorites_are_per_user() {
        let db = Database::in_memory().await;
        with_user(&db, "u1").await;
        with_user(&db, "u2").await;

        MetadataService::add_favorite(&db, "u1", "f1", "Report", Some("application/pdf"))
            .await
            .unwrap();
        MetadataService::add_favorite(&db, "u1", "f1", "Report v2", None)
            .await
            .unwrap();

        let mine = MetadataService::list_favorites(&db, "u1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "Report v2");
        assert!(MetadataService::list_favorites(&db, "u2").await.unwrap().is_empty());

        MetadataService::remove_favorite(&db, "u1", "f1").await.unwrap();
        assert!(matches!(
            MetadataService::remove_favorite(&db, "u1", "f1").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tags_replace_and_count() {
        let db = Database::in_memory().await;
        MetadataService::set_tags(&db, "f1", &["Work".to_string(), "urgent".to_string()])
            .await
            .unwrap();
        MetadataService::set_tags(&db, "f2", &["work".to_string()])
            .await
            .unwrap();
        let f1 = MetadataService::set_tags(&db, "f1", &["work".to_string()])
            .await
            .unwrap();
        assert_eq!(f1.tags, vec!["work"]);

        let counts = MetadataService::tag_counts(&db).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].count, 2);

        let mut ids = MetadataService::files_with_tag(&db, "WORK").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn test_pins_keep_insertion_order() {
        let db = Database::in_memory().await;
        MetadataService::pin_folder(&db, "a", "Alpha", "u1").await.unwrap();
        MetadataService::pin_folder(&db, "b", "Beta", "u1").await.unwrap();
        let renamed = MetadataService::pin_folder(&db, "a", "Alpha 2", "u1").await.unwrap();
        assert_eq!(renamed.position, 0);

        let pins = MetadataService::list_pins(&db).await.unwrap();
        assert_eq!(
            pins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Alpha 2", "Beta"]
        );
        assert_eq!(pins[1].position, 1);

        MetadataService::unpin_folder(&db, "a").await.unwrap();
        assert!(MetadataService::unpin_folder(&db, "a").await.is_err());
    }
}
