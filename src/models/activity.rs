use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Login,
    Logout,
    Download,
    Upload,
    Delete,
    Move,
    Copy,
    Rename,
    CreateFolder,
    ShareCreated,
    ShareRevoked,
    FolderUnlock,
    TwoFactorEnabled,
    TwoFactorDisabled,
    ConfigUpdated,
    ProtectedFolderUpdated,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Login => "login",
            ActivityType::Logout => "logout",
            ActivityType::Download => "download",
            ActivityType::Upload => "upload",
            ActivityType::Delete => "delete",
            ActivityType::Move => "move",
            ActivityType::Copy => "copy",
            ActivityType::Rename => "rename",
            ActivityType::CreateFolder => "create_folder",
            ActivityType::ShareCreated => "share_created",
            ActivityType::ShareRevoked => "share_revoked",
            ActivityType::FolderUnlock => "folder_unlock",
            ActivityType::TwoFactorEnabled => "two_factor_enabled",
            ActivityType::TwoFactorDisabled => "two_factor_disabled",
            ActivityType::ConfigUpdated => "config_updated",
            ActivityType::ProtectedFolderUpdated => "protected_folder_updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Failure,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Failure => "failure",
        }
    }
}

/// Stored activity entry
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub actor_email: Option<String>,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub status: String,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: i64,
}

/// Entry to append, built by the service that performed the action
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    pub actor_email: Option<String>,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
}

impl NewActivity {
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            status: ActivityStatus::Success,
            actor_email: None,
            target_id: None,
            target_name: None,
            details: None,
            ip_address: None,
        }
    }

    pub fn failed(mut self) -> Self {
        self.status = ActivityStatus::Failure;
        self
    }

    pub fn actor(mut self, email: impl Into<String>) -> Self {
        self.actor_email = Some(email.into());
        self
    }

    pub fn target(mut self, id: impl Into<String>, name: Option<String>) -> Self {
        self.target_id = Some(id.into());
        self.target_name = name;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(rename = "type")]
    pub activity_type: Option<ActivityType>,
    pub limit: Option<i64>,
    /// Only entries older than this unix timestamp
    pub before: Option<i64>,
    /// Id of the last entry of the previous page, breaks ties within `before`
    #[serde(rename = "beforeId")]
    pub before_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TopItem {
    pub target_id: String,
    pub target_name: Option<String>,
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub days: u32,
    pub total_events: i64,
    pub by_type: BTreeMap<String, i64>,
    pub daily: Vec<DailyCount>,
    pub top_downloads: Vec<TopItem>,
    pub failed_unlocks: i64,
    pub active_users: i64,
}
