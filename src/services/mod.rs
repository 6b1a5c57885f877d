pub mod access;
pub mod activity;
pub mod auth;
pub mod cache;
pub mod file;
pub mod maintenance;
pub mod media;
pub mod metadata;
pub mod rate_limit;
pub mod settings;
pub mod share;
pub mod two_factor;
pub mod user;

pub use access::{AccessContext, AccessGrant, AccessService};
pub use activity::ActivityService;
pub use auth::AuthService;
pub use cache::CacheService;
pub use file::FileService;
pub use maintenance::MaintenanceService;
pub use media::MediaService;
pub use metadata::MetadataService;
pub use rate_limit::RateLimitService;
pub use settings::SettingsService;
pub use share::ShareService;
pub use two_factor::TwoFactorService;
pub use user::UserService;
