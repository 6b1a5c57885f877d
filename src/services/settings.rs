use chrono::Utc;
use serde_json::{Map, Value};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::AppSettings;

/// Branding and feature toggles stored one row per key
pub struct SettingsService;

impl SettingsService {
    fn defaults() -> Result<Map<String, Value>> {
        match serde_json::to_value(AppSettings::default()) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(AppError::Internal("Settings are not an object".to_string())),
        }
    }

    /// Stored values merged over the defaults, unreadable rows are ignored
    pub async fn load(db: &Database) -> Result<AppSettings> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM app_config")
            .fetch_all(db.pool())
            .await?;

        let mut merged = Self::defaults()?;
        for (key, raw) in rows {
            if !merged.contains_key(&key) {
                continue;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    merged.insert(key, value);
                }
                Err(e) => tracing::warn!("Ignoring unreadable setting {}: {}", key, e),
            }
        }

        serde_json::from_value(Value::Object(merged)).or_else(|e| {
            tracing::warn!("Stored settings are invalid, using defaults: {}", e);
            Ok(AppSettings::default())
        })
    }

    /// Apply a partial update, rejecting unknown keys and mistyped values
    pub async fn update(db: &Database, patch: Value) -> Result<AppSettings> {
        let Value::Object(patch) = patch else {
            return Err(AppError::BadRequest("Settings must be a JSON object".to_string()));
        };
        if patch.is_empty() {
            return Err(AppError::BadRequest("No settings to update".to_string()));
        }

        let defaults = Self::defaults()?;
        if let Some(unknown) = patch.keys().find(|k| !defaults.contains_key(*k)) {
            return Err(AppError::BadRequest(format!("Unknown setting: {}", unknown)));
        }

        let current = Self::load(db).await?;
        let mut merged = match serde_json::to_value(current) {
            Ok(Value::Object(map)) => map,
            _ => return Err(AppError::Internal("Settings are not an object".to_string())),
        };
        merged.extend(patch.clone());
        let updated: AppSettings = serde_json::from_value(Value::Object(merged))
            .map_err(|e| AppError::BadRequest(format!("Invalid setting value: {}", e)))?;

        let now = Utc::now().to_rfc3339();
        let mut tx = db.pool().begin().await?;
        for (key, value) in &patch {
            sqlx::query(
                r#"
                INSERT INTO app_config (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value.to_string())
            .bind(&now)
            .execute(tx.as_mut())
            .await?;
        }
        tx.commit().await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let db = Database::in_memory().await;
        assert_eq!(SettingsService::load(&db).await.unwrap(), AppSettings::default());
    }

    #[tokio::test]
    async fn test_partial_update_persists() {
        let db = Database::in_memory().await;
        let updated = SettingsService::update(
            &db,
            json!({ "appName": "Family Drive", "enableUploads": false, "logoUrl": "/logo.png" }),
        )
        .await
        .unwrap();
        assert_eq!(updated.app_name, "Family Drive");
        assert!(!updated.enable_uploads);

        let loaded = SettingsService::load(&db).await.unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(loaded.logo_url.as_deref(), Some("/logo.png"));
        assert!(loaded.enable_downloads);

        let cleared = SettingsService::update(&db, json!({ "logoUrl": null }))
            .await
            .unwrap();
        assert_eq!(cleared.logo_url, None);
    }

    #[tokio::test]
    async fn test_rejects_unknown_keys_and_wrong_types() {
        let db = Database::in_memory().await;
        let err = SettingsService::update(&db, json!({ "theme": "dark" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("theme")));

        let err = SettingsService::update(&db, json!({ "enableSearch": "yes" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert!(SettingsService::update(&db, json!([1, 2])).await.is_err());
        assert_eq!(SettingsService::load(&db).await.unwrap(), AppSettings::default());
    }
}
