use std::path::PathBuf;
use tower_http::services::{ServeDir, ServeFile};

/// Pre-built frontend; paths without a file fall back to `index.html` for client routing
pub fn spa_service(frontend_dir: &str) -> ServeDir<ServeFile> {
    let dist = PathBuf::from(frontend_dir);
    let index = dist.join("index.html");
    if !index.exists() {
        tracing::warn!("Frontend not found at {}, only the API is served", dist.display());
    }
    ServeDir::new(dist).fallback(ServeFile::new(index))
}
