//! HTTP control surface
//!
//! Callers identify themselves with the `x-user-id` header. Privilege is
//! membership in the configured admin list.

pub mod error;
pub mod handlers;

use crate::collaborators::{LocalStartChannel, MetadataResolver};
use crate::queue::QueueStore;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{delete, get, post},
    Router,
};
use jukebox_common::AppConfig;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, ApiResult};

/// Header carrying the caller's user id
pub const USER_HEADER: &str = "x-user-id";

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub store: QueueStore,
    pub starts: Arc<LocalStartChannel>,
    pub resolver: Arc<dyn MetadataResolver>,
    pub config: Arc<AppConfig>,
}

/// Identity of the requesting user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub privileged: bool,
}

impl Caller {
    /// Owner of the resource or privileged
    pub fn may_act_for(&self, owner: &str) -> bool {
        self.privileged || self.user_id == owner
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, ctx: &AppContext) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", USER_HEADER)))?;

        Ok(Caller {
            user_id: user_id.to_string(),
            privileged: ctx.config.is_admin(user_id),
        })
    }
}

/// Build the router
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/queue", get(handlers::list_queue).post(handlers::enqueue))
        .route("/queue/:id", delete(handlers::remove))
        .route("/queue/:id/swap", post(handlers::swap))
        .route("/slugs/:slug/move", post(handlers::move_entry))
        .route("/users/:user_id/queue", delete(handlers::purge_user))
        .route("/stats", get(handlers::stats))
        .route("/playback/start", post(handlers::start_playback))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
}

/// Serve the HTTP API until the listener fails
pub async fn serve(ctx: AppContext) -> jukebox_common::Result<()> {
    let addr = ctx.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
