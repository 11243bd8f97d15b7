//! HTTP request handlers

use super::{ApiError, ApiResult, AppContext, Caller};
use crate::collaborators::StartRequest;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use jukebox_common::db::QueueEntry;
use jukebox_common::{time, Error};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    25
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    #[serde(flatten)]
    entry: QueueEntry,
    /// Seconds of content ahead of this entry
    wait_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    total: i64,
    entries: Vec<QueueItem>,
}

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    /// 1-based; clamped into the queue
    position: i64,
}

#[derive(Debug, Serialize)]
pub struct MoveResponse {
    /// 1-based position after the move
    position: i64,
    entry: QueueEntry,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    stats: crate::queue::QueueStats,
    estimated_end: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartBody {
    #[serde(default)]
    entry_id: Option<i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jukebox_player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /queue - active entries in play order
pub async fn list_queue(
    State(ctx): State<AppContext>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<QueueResponse>> {
    if page.limit < 0 || page.offset < 0 {
        return Err(ApiError::BadRequest("limit and offset must be >= 0".to_string()));
    }

    let mut tx = ctx.store.begin().await?;
    let total = tx.count_active().await?;
    let page_entries = tx.find_active(page.limit, page.offset).await?;

    let mut entries = Vec::with_capacity(page_entries.len());
    let mut wait_secs = match page_entries.first() {
        Some(first) => tx.duration_until(first).await?,
        None => 0,
    };
    for entry in page_entries {
        let duration = entry.duration;
        entries.push(QueueItem { entry, wait_secs });
        wait_secs += duration;
    }
    tx.commit().await?;

    Ok(Json(QueueResponse { total, entries }))
}

/// POST /queue - resolve a URL and queue it for the caller
pub async fn enqueue(
    State(ctx): State<AppContext>,
    caller: Caller,
    Json(body): Json<UrlRequest>,
) -> ApiResult<(StatusCode, Json<QueueItem>)> {
    let url = submitted_url(&body)?;

    // Cheap check before the resolver runs; repeated inside the unit of work
    if !caller.privileged
        && ctx.store.count_active_by_user(&caller.user_id).await? >= ctx.config.user_limit
    {
        return Err(user_limit_error(ctx.config.user_limit));
    }

    let song = ctx.resolver.resolve(url).await?;

    let mut tx = ctx.store.begin().await?;
    if !caller.privileged && tx.count_active_by_user(&caller.user_id).await? >= ctx.config.user_limit {
        return Err(user_limit_error(ctx.config.user_limit));
    }
    let entry = tx.enqueue(&song, &caller.user_id).await?;
    let wait_secs = tx.duration_until(&entry).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(QueueItem { entry, wait_secs })))
}

fn submitted_url(body: &UrlRequest) -> ApiResult<&str> {
    let url = body.url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("url is required".to_string()));
    }
    if url.starts_with('-') {
        return Err(ApiError::BadRequest("url must not start with '-'".to_string()));
    }
    Ok(url)
}

fn user_limit_error(limit: i64) -> ApiError {
    ApiError::Common(Error::Validation(format!(
        "You can have at most {} songs in the queue",
        limit
    )))
}

/// DELETE /queue/:id - owner or privileged, active entries only
pub async fn remove(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<i64>,
) -> ApiResult<Json<QueueEntry>> {
    let mut tx = ctx.store.begin().await?;
    let entry = tx
        .find_by_id(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Queue entry {}", id)))?;
    if !caller.may_act_for(&entry.user_id) {
        return Err(ApiError::Forbidden("You may only remove your own songs".to_string()));
    }
    if !entry.is_active() {
        return Err(Error::InvalidState(format!("Entry {} has already been dequeued", id)).into());
    }
    let removed = tx.remove(id).await?;
    tx.commit().await?;

    info!("{} removed {}", caller.user_id, removed.slug);
    Ok(Json(removed))
}

/// POST /queue/:id/swap - privileged, or the owner when self-swap is allowed
pub async fn swap(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(body): Json<UrlRequest>,
) -> ApiResult<Json<QueueEntry>> {
    if !caller.privileged && !ctx.config.allow_self_swap {
        return Err(ApiError::Forbidden("You may not swap songs".to_string()));
    }

    let song = ctx.resolver.resolve(submitted_url(&body)?).await?;

    let mut tx = ctx.store.begin().await?;
    let entry = tx
        .find_by_id(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Queue entry {}", id)))?;
    if !caller.may_act_for(&entry.user_id) {
        return Err(ApiError::Forbidden("You may only swap your own songs".to_string()));
    }
    let swapped = tx.swap(id, &song).await?;
    tx.commit().await?;

    Ok(Json(swapped))
}

/// POST /slugs/:slug/move - privileged only
pub async fn move_entry(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(slug): Path<String>,
    Json(body): Json<MoveRequest>,
) -> ApiResult<Json<MoveResponse>> {
    if !caller.privileged {
        return Err(ApiError::Forbidden("You may not move songs".to_string()));
    }

    let mut tx = ctx.store.begin().await?;
    let entry = tx
        .find_by_slug(&slug)
        .await?
        .ok_or_else(|| Error::NotFound(format!("No queued song '{}'", slug)))?;
    let max = tx.max_position().await?.unwrap_or(0);
    let target = (body.position - 1).clamp(0, max);
    let moved = tx.move_entry(entry.id, target).await?;
    tx.commit().await?;

    Ok(Json(MoveResponse {
        position: moved.position + 1,
        entry: moved,
    }))
}

/// DELETE /users/:user_id/queue - the user themself or privileged
pub async fn purge_user(
    State(ctx): State<AppContext>,
    caller: Caller,
    Path(user_id): Path<String>,
) -> ApiResult<Json<PurgeResponse>> {
    if !caller.may_act_for(&user_id) {
        return Err(ApiError::Forbidden("You may only purge your own songs".to_string()));
    }
    let removed = ctx.store.purge_user(&user_id).await?;
    Ok(Json(PurgeResponse {
        removed: removed.len(),
    }))
}

/// GET /stats
pub async fn stats(State(ctx): State<AppContext>) -> ApiResult<Json<StatsResponse>> {
    let stats = ctx.store.stats().await?;
    let estimated_end = stats.estimated_end(time::now());
    Ok(Json(StatsResponse {
        stats,
        estimated_end,
    }))
}

/// POST /playback/start - start the staged entry early
pub async fn start_playback(
    State(ctx): State<AppContext>,
    caller: Caller,
    body: Option<Json<StartBody>>,
) -> ApiResult<StatusCode> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let awaiting = ctx
        .starts
        .awaiting()
        .await
        .ok_or_else(|| Error::InvalidState("No song is waiting to start".to_string()))?;
    if !caller.may_act_for(&awaiting.user_id) {
        return Err(ApiError::Forbidden(
            "Only the submitter or an admin can start this song".to_string(),
        ));
    }

    ctx.starts
        .request_start(StartRequest {
            entry_id: body.entry_id,
            requested_by: caller.user_id,
            privileged: caller.privileged,
        })
        .await?;
    Ok(StatusCode::ACCEPTED)
}
