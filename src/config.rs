use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_frontend_dir")]
    pub frontend_dir: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    /// Take the client address from X-Forwarded-For / X-Real-IP, only behind a proxy
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_jwt_secret")]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
    #[serde(default = "default_session_expire")]
    pub session_expire_hours: u64,
    #[serde(default = "default_folder_token_expire")]
    pub folder_token_expire_minutes: u64,
    #[serde(default = "default_mfa_token_expire")]
    pub mfa_token_expire_minutes: u64,
    #[serde(default)]
    pub cookie_secure: bool,
}

/// Google OAuth client used for user sign-in
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    /// Empty means any Google account may sign in
    #[serde(default)]
    pub allowed_emails: Vec<String>,
    #[serde(default = "default_true")]
    pub require_login: bool,
}

/// Service credentials for the indexed Drive
#[derive(Debug, Clone, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_root_folder")]
    pub root_folder_id: String,
    #[serde(default = "default_drive_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_share_expire")]
    pub default_expire: String,
    #[serde(default = "default_share_max_expire")]
    pub max_expire: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_api_limit")]
    pub api_limit: u32,
    #[serde(default = "default_auth_limit")]
    pub auth_limit: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_listing_ttl")]
    pub listing_ttl_seconds: u64,
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_max_files")]
    pub max_files: usize,
    #[serde(default = "default_archive_max_total_mb")]
    pub max_total_mb: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_frontend_dir() -> String {
    "frontend/dist".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_upload_mb() -> u64 {
    100
}

fn default_db_path() -> String {
    "data/zee-index.db".to_string()
}

fn default_jwt_secret() -> String {
    "change-me-zee-index-secret".to_string()
}

fn default_session_expire() -> u64 {
    24 * 7
}

fn default_folder_token_expire() -> u64 {
    60
}

fn default_mfa_token_expire() -> u64 {
    5
}

fn default_redirect_url() -> String {
    "http://localhost:3000/api/auth/callback".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_userinfo_url() -> String {
    "https://openidconnect.googleapis.com/v1/userinfo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_root_folder() -> String {
    "root".to_string()
}

fn default_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_share_expire() -> String {
    "24h".to_string()
}

fn default_share_max_expire() -> String {
    "30d".to_string()
}

fn default_api_limit() -> u32 {
    120
}

fn default_auth_limit() -> u32 {
    10
}

fn default_window_seconds() -> u64 {
    60
}

fn default_retention_days() -> u32 {
    30
}

fn default_listing_ttl() -> u64 {
    60
}

fn default_metadata_ttl() -> u64 {
    300
}

fn default_archive_max_files() -> usize {
    500
}

fn default_archive_max_total_mb() -> u64 {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frontend_dir: default_frontend_dir(),
            public_url: default_public_url(),
            max_upload_mb: default_max_upload_mb(),
            trust_proxy_headers: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: default_jwt_secret(),
            previous_secrets: Vec::new(),
            session_expire_hours: default_session_expire(),
            folder_token_expire_minutes: default_folder_token_expire(),
            mfa_token_expire_minutes: default_mfa_token_expire(),
            cookie_secure: false,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: default_redirect_url(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            userinfo_url: default_userinfo_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            allowed_emails: Vec::new(),
            require_login: true,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            root_folder_id: default_root_folder(),
            api_base: default_drive_api_base(),
            token_url: default_token_url(),
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            default_expire: default_share_expire(),
            max_expire: default_share_max_expire(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api_limit: default_api_limit(),
            auth_limit: default_auth_limit(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listing_ttl_seconds: default_listing_ttl(),
            metadata_ttl_seconds: default_metadata_ttl(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_files: default_archive_max_files(),
            max_total_mb: default_archive_max_total_mb(),
        }
    }
}

impl AuthConfig {
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|e| e.eq_ignore_ascii_case(email))
    }

    pub fn is_email_allowed(&self, email: &str) -> bool {
        self.allowed_emails.is_empty()
            || self.is_admin_email(email)
            || self
                .allowed_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(email))
    }
}

impl ShareConfig {
    pub fn default_expire(&self) -> Duration {
        humantime::parse_duration(&self.default_expire).unwrap_or(Duration::from_secs(24 * 3600))
    }

    pub fn max_expire(&self) -> Duration {
        humantime::parse_duration(&self.max_expire).unwrap_or(Duration::from_secs(30 * 24 * 3600))
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_jwt_secret()?;
        if config.drive.refresh_token.is_empty() {
            tracing::warn!("Drive refresh token is not configured, Drive requests will fail");
        }
        tracing::info!(
            "Indexing Drive folder {} (require_login={})",
            config.drive.root_folder_id,
            config.auth.require_login
        );
        Ok(config)
    }

    /// Ensure JWT secret is secure and persisted
    fn ensure_jwt_secret(&mut self) -> anyhow::Result<()> {
        if self.jwt.secret == default_jwt_secret() || self.jwt.secret.is_empty() {
            let secret_path = Path::new("data/.jwt_secret");

            if secret_path.exists() {
                let secret = fs::read_to_string(secret_path)?;
                self.jwt.secret = secret.trim().to_string();
                tracing::info!("Loaded persisted JWT secret from data/.jwt_secret");
            } else {
                let secret = format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                );

                if let Some(parent) = secret_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                fs::write(secret_path, &secret)?;
                self.jwt.secret = secret;
                tracing::info!("Generated and persisted new JWT secret to data/.jwt_secret");
            }
        }
        Ok(())
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "zee.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: ZEE_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let list = |val: String| -> Vec<String> {
            val.split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        };

        // Server overrides
        if let Some(val) = lookup("ZEE_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("ZEE_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = lookup("ZEE_CONF_SERVER_FRONTEND_DIR") {
            self.server.frontend_dir = val;
        }
        if let Some(val) = lookup("ZEE_CONF_SERVER_PUBLIC_URL") {
            self.server.public_url = val.trim_end_matches('/').to_string();
        }
        if let Some(mb) = lookup("ZEE_CONF_SERVER_MAX_UPLOAD_MB").and_then(|v| v.parse().ok()) {
            self.server.max_upload_mb = mb;
        }
        if let Some(v) = lookup("ZEE_CONF_SERVER_TRUST_PROXY_HEADERS").and_then(|v| v.parse().ok()) {
            self.server.trust_proxy_headers = v;
        }

        // Database overrides
        if let Some(val) = lookup("ZEE_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT overrides
        if let Some(val) = lookup("ZEE_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Some(val) = lookup("ZEE_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = list(val);
        }
        if let Some(hours) = lookup("ZEE_CONF_JWT_SESSION_EXPIRE").and_then(|v| v.parse().ok()) {
            self.jwt.session_expire_hours = hours;
        }
        if let Some(v) = lookup("ZEE_CONF_JWT_COOKIE_SECURE").and_then(|v| v.parse().ok()) {
            self.jwt.cookie_secure = v;
        }

        // OAuth overrides
        if let Some(val) = lookup("ZEE_CONF_OAUTH_CLIENT_ID") {
            self.oauth.client_id = val;
        }
        if let Some(val) = lookup("ZEE_CONF_OAUTH_CLIENT_SECRET") {
            self.oauth.client_secret = val;
        }
        if let Some(val) = lookup("ZEE_CONF_OAUTH_REDIRECT_URL") {
            self.oauth.redirect_url = val;
        }

        // Auth overrides
        if let Some(val) = lookup("ZEE_CONF_AUTH_ADMIN_EMAILS") {
            self.auth.admin_emails = list(val);
        }
        if let Some(val) = lookup("ZEE_CONF_AUTH_ALLOWED_EMAILS") {
            self.auth.allowed_emails = list(val);
        }
        if let Some(v) = lookup("ZEE_CONF_AUTH_REQUIRE_LOGIN").and_then(|v| v.parse().ok()) {
            self.auth.require_login = v;
        }

        // Drive overrides
        if let Some(val) = lookup("ZEE_CONF_DRIVE_CLIENT_ID") {
            self.drive.client_id = val;
        }
        if let Some(val) = lookup("ZEE_CONF_DRIVE_CLIENT_SECRET") {
            self.drive.client_secret = val;
        }
        if let Some(val) = lookup("ZEE_CONF_DRIVE_REFRESH_TOKEN") {
            self.drive.refresh_token = val;
        }
        if let Some(val) = lookup("ZEE_CONF_DRIVE_ROOT_FOLDER_ID") {
            if !val.trim().is_empty() {
                self.drive.root_folder_id = val;
            }
        }

        // Rate limit overrides
        if let Some(v) = lookup("ZEE_CONF_RATE_LIMIT_API_LIMIT").and_then(|v| v.parse().ok()) {
            self.rate_limit.api_limit = v;
        }
        if let Some(v) = lookup("ZEE_CONF_RATE_LIMIT_AUTH_LIMIT").and_then(|v| v.parse().ok()) {
            self.rate_limit.auth_limit = v;
        }

        // Activity overrides
        if let Some(v) = lookup("ZEE_CONF_ACTIVITY_RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            self.activity.retention_days = v;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
