mod config;
mod db;
mod drive;
mod error;
mod format;
mod handlers;
mod middleware;
mod models;
mod services;
mod static_files;


use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::drive::{DriveApi, GoogleDrive};
use crate::handlers::{admin, auth, files, folder, media, metadata, share, system, two_factor};
use crate::services::MaintenanceService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub drive: Arc<dyn DriveApi>,
    pub http: reqwest::Client,
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zee_index=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Zee Index...");

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let http = reqwest::Client::builder()
        .user_agent(concat!("zee-index/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let drive: Arc<dyn DriveApi> = Arc::new(GoogleDrive::new(http.clone(), config.drive.clone()));

    MaintenanceService::spawn(db.clone(), config.clone());

    let state = AppState {
        db,
        config: config.clone(),
        drive,
        http,
    };
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max((state.config.server.max_upload_mb * 1024 * 1024) as usize);

    // Credential checks, rate limited per client
    let credential_routes = Router::new()
        .route("/auth/callback", get(auth::oauth_callback))
        .route("/auth/login/2fa", post(auth::login_2fa))
        .route("/auth/folder", post(folder::unlock_folder))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::auth_rate_limit,
        ));

    // Public routes (session optional, access checked per item)
    let public_routes = Router::new()
        .route("/health", get(system::health))
        .route("/config", get(system::get_config))
        .route("/auth/google", get(auth::google_login))
        .route("/share/verify", get(share::verify_share))
        .route("/files", get(files::list_files))
        .route("/files/:id", get(files::get_file))
        .route("/files/:id/download", get(files::download_file))
        .route("/files/:id/revisions", get(files::list_revisions))
        .route("/files/:id/zip", get(media::download_zip))
        .route("/thumbnail/:id", get(media::thumbnail))
        .route("/pins", get(metadata::list_pins))
        .route("/tags", get(metadata::list_tags))
        .route("/tags/:file_id", get(metadata::get_tags))
        .merge(credential_routes);

    // Protected routes (auth required)
    let protected_routes = Router::new()
        // Auth
        .route("/auth/session", get(auth::session))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/2fa/setup", post(two_factor::begin_totp))
        .route("/auth/2fa/enable", post(two_factor::enable_totp))
        .route("/auth/2fa/disable", post(two_factor::disable_totp))
        // Browsing
        .route("/search", get(files::search))
        .route("/storage", get(files::storage))
        // Shares
        .route("/share", get(share::list_shares).post(share::create_share))
        .route("/share/:id", delete(share::revoke_share))
        // Favorites
        .route(
            "/favorites",
            get(metadata::list_favorites).post(metadata::add_favorite),
        )
        .route("/favorites/:file_id", delete(metadata::remove_favorite))
        // File management
        .route("/files/folder", post(files::create_folder))
        .route("/files/upload", post(files::upload_file))
        .route("/files/move", post(files::move_files))
        .route("/files/delete", post(files::delete_files))
        .route("/files/:id", patch(files::rename_file))
        .route("/files/:id/copy", post(files::copy_file))
        // Tags and pins
        .route("/tags/:file_id", put(metadata::set_tags))
        .route("/pins", post(metadata::pin_folder))
        .route("/pins/:folder_id", delete(metadata::unpin_folder))
        // Admin routes
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id/role", put(admin::update_user_role))
        .route("/admin/users/:id/status", put(admin::update_user_status))
        .route("/admin/activity", get(admin::list_activity))
        .route("/admin/analytics", get(admin::analytics))
        .route("/admin/config", put(admin::update_config))
        .route(
            "/admin/protected-folders",
            get(folder::list_protected).post(folder::protect_folder),
        )
        .route(
            "/admin/protected-folders/:folder_id",
            delete(folder::unprotect_folder),
        )
        .route("/admin/cache/purge", post(admin::purge_cache))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let api = public_routes
        .merge(protected_routes)
        .fallback(system::not_found)
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::session_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::api_rate_limit,
        ));

    // Everything outside /api is the frontend
    Router::new()
        .nest("/api", api)
        .fallback_service(static_files::spa_service(&state.config.server.frontend_dir))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
