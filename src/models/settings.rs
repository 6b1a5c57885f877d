use serde::{Deserialize, Serialize};

/// Branding and feature toggles, one stored row per field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    pub app_name: String,
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub footer_text: Option<String>,
    pub enable_downloads: bool,
    pub enable_uploads: bool,
    pub enable_public_shares: bool,
    pub enable_search: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "Zee Index".to_string(),
            logo_url: None,
            primary_color: "#2563eb".to_string(),
            footer_text: None,
            enable_downloads: true,
            enable_uploads: true,
            enable_public_shares: true,
            enable_search: true,
        }
    }
}
