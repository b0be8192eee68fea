pub mod conversations;
pub mod emoji;
pub mod error;
pub mod identity;
pub mod media;
pub mod members;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod search;
pub mod sticker;
pub mod views;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;

use crate::error::AppError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub http: reqwest::Client,
}

/// Run a blocking database closure off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("blocking task join error: {}", e)))?
}

/// Operations scoped "as this user" require the authenticated actor to be
/// the user named in the path.
pub(crate) fn require_self(claims: &parley_types::api::Claims, username: &str) -> Result<(), AppError> {
    if claims.username != username {
        return Err(AppError::Forbidden);
    }
    Ok(())
}
