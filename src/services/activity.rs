use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{
    ActivityLog, ActivityQuery, ActivityStatus, ActivityType, AnalyticsSummary, DailyCount,
    NewActivity, TopItem,
};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;
const DEFAULT_ANALYTICS_DAYS: u32 = 7;
const MAX_ANALYTICS_DAYS: u32 = 365;

/// Append-only audit trail
pub struct ActivityService;

impl ActivityService {
    pub async fn log(db: &Database, entry: NewActivity) -> Result<ActivityLog> {
        let id = Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp();
        let details = entry.details.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO activity_logs
                (id, activity_type, actor_email, target_id, target_name, status, details, ip_address, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(entry.activity_type.as_str())
        .bind(&entry.actor_email)
        .bind(&entry.target_id)
        .bind(&entry.target_name)
        .bind(entry.status.as_str())
        .bind(&details)
        .bind(&entry.ip_address)
        .bind(timestamp)
        .execute(db.pool())
        .await?;

        Ok(ActivityLog {
            id,
            activity_type: entry.activity_type.as_str().to_string(),
            actor_email: entry.actor_email,
            target_id: entry.target_id,
            target_name: entry.target_name,
            status: entry.status.as_str().to_string(),
            details,
            ip_address: entry.ip_address,
            timestamp,
        })
    }

    /// Log without failing the request that triggered it
    pub async fn record(db: &Database, entry: NewActivity) {
        let kind = entry.activity_type;
        if let Err(e) = Self::log(db, entry).await {
            tracing::warn!("Failed to record {} activity: {}", kind.as_str(), e);
        }
    }

    /// Newest first, paged by `(timestamp, rowid)` so entries sharing a second are not skipped
    pub async fn list(db: &Database, query: &ActivityQuery) -> Result<Vec<ActivityLog>> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let before = query.before.unwrap_or(i64::MAX);
        let kind = query.activity_type.map(|k| k.as_str());

        let logs = sqlx::query_as(
            r#"
            SELECT * FROM activity_logs
            WHERE (? IS NULL OR activity_type = ?)
              AND (timestamp < ? OR (timestamp = ? AND rowid <
                  COALESCE((SELECT rowid FROM activity_logs WHERE id = ?), -1)))
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(kind)
        .bind(kind)
        .bind(before)
        .bind(before)
        .bind(query.before_id.as_deref())
        .bind(limit)
        .fetch_all(db.pool())
        .await?;

        Ok(logs)
    }

    /// Delete entries older than the retention window
    pub async fn prune(db: &Database, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - i64::from(retention_days) * 86_400;
        let result = sqlx::query("DELETE FROM activity_logs WHERE timestamp < ?")
            .bind(cutoff)
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn analytics(db: &Database, days: Option<u32>) -> Result<AnalyticsSummary> {
        let days = days
            .unwrap_or(DEFAULT_ANALYTICS_DAYS)
            .clamp(1, MAX_ANALYTICS_DAYS);
        let since = Utc::now().timestamp() - i64::from(days) * 86_400;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT activity_type, COUNT(*) FROM activity_logs
            WHERE timestamp >= ?
            GROUP BY activity_type
            "#,
        )
        .bind(since)
        .fetch_all(db.pool())
        .await?;
        let by_type: BTreeMap<String, i64> = rows.into_iter().collect();
        let total_events = by_type.values().sum();

        let daily: Vec<DailyCount> = sqlx::query_as(
            r#"
            SELECT date(timestamp, 'unixepoch') AS date, COUNT(*) AS count
            FROM activity_logs
            WHERE timestamp >= ?
            GROUP BY date
            ORDER BY date
            "#,
        )
        .bind(since)
        .fetch_all(db.pool())
        .await?;

        let top_downloads: Vec<TopItem> = sqlx::query_as(
            r#"
            SELECT target_id, MAX(target_name) AS target_name, COUNT(*) AS count
            FROM activity_logs
            WHERE activity_type = ? AND status = ? AND target_id IS NOT NULL AND timestamp >= ?
            GROUP BY target_id
            ORDER BY count DESC, target_id
            LIMIT 10
            "#,
        )
        .bind(ActivityType::Download.as_str())
        .bind(ActivityStatus::Success.as_str())
        .bind(since)
        .fetch_all(db.pool())
        .await?;

        let failed_unlocks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_logs WHERE activity_type = ? AND status = ? AND timestamp >= ?",
        )
        .bind(ActivityType::FolderUnlock.as_str())
        .bind(ActivityStatus::Failure.as_str())
        .bind(since)
        .fetch_one(db.pool())
        .await?;

        let active_users: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT actor_email) FROM activity_logs WHERE actor_email IS NOT NULL AND timestamp >= ?",
        )
        .bind(since)
        .fetch_one(db.pool())
        .await?;

        Ok(AnalyticsSummary {
            days,
            total_events,
            by_type,
            daily,
            top_downloads,
            failed_unlocks,
            active_users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backdate(db: &Database, id: &str, seconds: i64) {
        sqlx::query("UPDATE activity_logs SET timestamp = timestamp - ? WHERE id = ?")
            .bind(seconds)
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_filters_by_type_newest_first() {
        let db = Database::in_memory().await;
        let first = ActivityService::log(&db, NewActivity::new(ActivityType::Login).actor("a@x.io"))
            .await
            .unwrap();
        backdate(&db, &first.id, 10).await;
        ActivityService::log(&db, NewActivity::new(ActivityType::Download).target("f1", None))
            .await
            .unwrap();
        ActivityService::log(&db, NewActivity::new(ActivityType::Login).actor("b@x.io"))
            .await
            .unwrap();

        let logins = ActivityService::list(
            &db,
            &ActivityQuery {
                activity_type: Some(ActivityType::Login),
                limit: None,
                before: None,
                before_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(logins.len(), 2);
        assert_eq!(logins[0].actor_email.as_deref(), Some("b@x.io"));
        assert_eq!(logins[1].actor_email.as_deref(), Some("a@x.io"));

        let limited = ActivityService::list(
            &db,
            &ActivityQuery {
                activity_type: None,
                limit: Some(1),
                before: None,
                before_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_paging_within_one_second() {
        let db = Database::in_memory().await;
        for _ in 0..5 {
            ActivityService::log(&db, NewActivity::new(ActivityType::Download))
                .await
                .unwrap();
        }
        sqlx::query("UPDATE activity_logs SET timestamp = 1000")
            .execute(db.pool())
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut cursor: Option<(i64, String)> = None;
        loop {
            let page = ActivityService::list(
                &db,
                &ActivityQuery {
                    activity_type: None,
                    limit: Some(2),
                    before: cursor.as_ref().map(|(ts, _)| *ts),
                    before_id: cursor.as_ref().map(|(_, id)| id.clone()),
                },
            )
            .await
            .unwrap();
            let Some(last) = page.last() else { break };
            cursor = Some((last.timestamp, last.id.clone()));
            seen.extend(page.into_iter().map(|e| e.id));
        }

        assert_eq!(seen.len(), 5);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn test_prune_drops_old_entries() {
        let db = Database::in_memory().await;
        let old = ActivityService::log(&db, NewActivity::new(ActivityType::Upload))
            .await
            .unwrap();
        backdate(&db, &old.id, 31 * 86_400).await;
        ActivityService::log(&db, NewActivity::new(ActivityType::Upload))
            .await
            .unwrap();

        assert_eq!(ActivityService::prune(&db, 30).await.unwrap(), 1);
        let rest = ActivityService::list(
            &db,
            &ActivityQuery {
                activity_type: None,
                limit: None,
                before: None,
                before_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_analytics_summary() {
        let db = Database::in_memory().await;
        for _ in 0..3 {
            ActivityService::log(
                &db,
                NewActivity::new(ActivityType::Download)
                    .actor("a@x.io")
                    .target("f1", Some("report.pdf".to_string())),
            )
            .await
            .unwrap();
        }
        ActivityService::log(
            &db,
            NewActivity::new(ActivityType::Download)
                .actor("b@x.io")
                .target("f2", Some("notes.txt".to_string())),
        )
        .await
        .unwrap();
        ActivityService::log(
            &db,
            NewActivity::new(ActivityType::FolderUnlock).failed().target("p", None),
        )
        .await
        .unwrap();

        let summary = ActivityService::analytics(&db, Some(7)).await.unwrap();
        assert_eq!(summary.total_events, 5);
        assert_eq!(summary.by_type.get("download"), Some(&4));
        assert_eq!(summary.failed_unlocks, 1);
        assert_eq!(summary.active_users, 2);
        assert_eq!(summary.top_downloads[0].target_id, "f1");
        assert_eq!(summary.top_downloads[0].count, 3);
        assert_eq!(summary.daily.iter().map(|d| d.count).sum::<i64>(), 5);
    }
}
