pub mod admin;
pub mod auth;
pub mod files;
pub mod folder;
pub mod media;
pub mod metadata;
pub mod share;
pub mod system;
pub mod two_factor;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ActivityType, CurrentUser, NewActivity};
use crate::services::AccessContext;

/// Check if user is admin
pub(crate) fn require_admin(user: &CurrentUser) -> Result<()> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }
    Ok(())
}

/// Reads outside the file routes still honor `auth.require_login`
pub(crate) fn require_viewer(config: &Config, ctx: &AccessContext) -> Result<()> {
    if config.auth.require_login && ctx.user.is_none() {
        return Err(AppError::Unauthorized("Authentication required".to_string()));
    }
    Ok(())
}

/// Feature toggles only bind non-admins
pub(crate) fn require_feature(enabled: bool, ctx: &AccessContext, message: &str) -> Result<()> {
    if !enabled && !ctx.is_admin() {
        return Err(AppError::Forbidden(message.to_string()));
    }
    Ok(())
}

/// Activity entry stamped with the caller and their address
pub(crate) fn activity(ctx: &AccessContext, activity_type: ActivityType) -> NewActivity {
    let entry = NewActivity::new(activity_type).ip(ctx.client_ip.clone());
    match ctx.actor_email() {
        Some(email) => entry.actor(email),
        None => entry,
    }
}
