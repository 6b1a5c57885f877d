use std::time::Duration;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::services::{
    ActivityService, CacheService, RateLimitService, ShareService, TwoFactorService,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Rows removed by one maintenance pass
#[derive(Debug, Default, PartialEq)]
pub struct MaintenanceReport {
    pub cache_entries: u64,
    pub share_rows: u64,
    pub totp_challenges: u64,
    pub rate_limits: u64,
    pub activity_logs: u64,
}

/// Periodic cleanup of expired rows
pub struct MaintenanceService;

impl MaintenanceService {
    pub async fn run_once(db: &Database, config: &Config) -> Result<MaintenanceReport> {
        let report = MaintenanceReport {
            cache_entries: CacheService::purge_expired(db).await?,
            share_rows: ShareService::purge_expired(db).await?,
            totp_challenges: TwoFactorService::purge_expired_challenges(db).await?,
            rate_limits: RateLimitService::purge(db, config.rate_limit.window_seconds).await?,
            activity_logs: ActivityService::prune(db, config.activity.retention_days).await?,
        };
        tracing::info!("Maintenance finished: {:?}", report);
        Ok(report)
    }

    /// Run a pass every hour for the life of the process
    pub fn spawn(db: Database, config: std::sync::Arc<Config>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = Self::run_once(&db, &config).await {
                    tracing::error!("Maintenance failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::tests::test_config;
    use chrono::Utc;

    #[tokio::test]
    async fn test_run_once_removes_expired_rows() {
        let db = Database::in_memory().await;
        let config = test_config();

        CacheService::set(&db, "drive:file:a", &"a", 60).await.unwrap();
        sqlx::query("INSERT INTO cache_entries (key, value, expires_at) VALUES ('drive:file:old', '\"x\"', 1)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO rate_limits (key, window_start, count) VALUES ('api:old', 0, 3)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO revoked_tokens (jti, expires_at) VALUES ('gone', ?)",
        )
        .bind(Utc::now().timestamp() - 10)
        .execute(db.pool())
        .await
        .unwrap();

        let report = MaintenanceService::run_once(&db, &config).await.unwrap();
        assert_eq!(report.cache_entries, 1);
        assert_eq!(report.rate_limits, 1);
        assert_eq!(report.share_rows, 1);
        assert_eq!(report.totp_challenges, 0);

        let again = MaintenanceService::run_once(&db, &config).await.unwrap();
        assert_eq!(again, MaintenanceReport::default());
    }
}
