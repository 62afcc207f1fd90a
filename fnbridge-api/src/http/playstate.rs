// Play-state reporting: Sessions/Playing/* and watched marking

use std::time::Instant;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use fnbridge_core::rendition::ticks_to_seconds;
use fnbridge_core::session::ClientSession;

use super::{AppError, AppResult, AppState};

const CACHE_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct CachedPlayInfo {
    pub media_guid: String,
    pub video_guid: String,
    pub duration: f64,
    cached_at: Instant,
}

/// Short-lived cache of `play/info` lookups, keyed by item guid. Progress
/// reports arrive every few seconds and must not hammer the backend.
#[derive(Debug, Default)]
pub struct PlayInfoCache {
    entries: DashMap<String, CachedPlayInfo>,
}

impl PlayInfoCache {
    #[must_use]
    pub fn get(&self, item_guid: &str) -> Option<CachedPlayInfo> {
        let entry = self.entries.get(item_guid)?;
        if entry.cached_at.elapsed().as_secs() >= CACHE_TTL_SECS {
            return None;
        }
        Some(entry.value().clone())
    }

    pub fn insert(&self, item_guid: &str, media_guid: String, video_guid: String, duration: f64) {
        self.entries.insert(
            item_guid.to_string(),
            CachedPlayInfo {
                media_guid,
                video_guid,
                duration,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn sweep(&self) {
        self.entries
            .retain(|_, v| v.cached_at.elapsed().as_secs() < CACHE_TTL_SECS * 2);
    }
}

pub async fn playing_start(state: State<AppState>, req: Request) -> AppResult<StatusCode> {
    report(state, req, "start").await
}

pub async fn playing_progress(state: State<AppState>, req: Request) -> AppResult<StatusCode> {
    report(state, req, "progress").await
}

pub async fn playing_stopped(state: State<AppState>, req: Request) -> AppResult<StatusCode> {
    report(state, req, "stopped").await
}

pub async fn playing_ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn report(
    State(state): State<AppState>,
    req: Request,
    event: &str,
) -> AppResult<StatusCode> {
    let session = req
        .extensions()
        .get::<ClientSession>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;

    let body: Value = match axum::body::to_bytes(req.into_body(), 64 * 1024).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    };

    let item_id = body["ItemId"].as_str().unwrap_or("");
    let position_ticks = body["PositionTicks"].as_i64().unwrap_or(0);
    let ts = ticks_to_seconds(position_ticks);

    // reports for items the bridge never minted an id for are dropped, not
    // failed; clients retry these aggressively
    let Some(item_guid) = state.ids.internal_id(item_id) else {
        return Ok(StatusCode::NO_CONTENT);
    };

    let client = state.backend_client(&session.backend_url, &session.backend_token)?;

    let cached = match state.play_cache.get(&item_guid) {
        Some(entry) => entry,
        None => match client.play_info(&item_guid).await {
            Ok(info) => {
                state.play_cache.insert(
                    &item_guid,
                    info.media_guid.clone(),
                    info.video_guid.clone(),
                    info.item.duration,
                );
                CachedPlayInfo {
                    media_guid: info.media_guid,
                    video_guid: info.video_guid,
                    duration: info.item.duration,
                    cached_at: Instant::now(),
                }
            }
            // lookup failed: fall back to what playback-info registered
            Err(_) => {
                let media_guid = body["MediaSourceId"].as_str().unwrap_or("").to_string();
                let meta = state.transcode.meta(&media_guid);
                CachedPlayInfo {
                    media_guid,
                    video_guid: meta.as_ref().map(|m| m.video_guid.clone()).unwrap_or_default(),
                    duration: meta.as_ref().map_or(0.0, |m| m.duration),
                    cached_at: Instant::now(),
                }
            }
        },
    };

    debug!(
        event,
        item_guid,
        media_guid = %cached.media_guid,
        ts,
        duration = cached.duration,
        "play-state report"
    );

    let play_link = state
        .transcode
        .cached(&cached.media_guid)
        .map(|s| s.play_link)
        .unwrap_or_default();

    if let Err(e) = client
        .record_play(
            &item_guid,
            &cached.media_guid,
            &cached.video_guid,
            ts,
            cached.duration,
            &play_link,
        )
        .await
    {
        debug!(error = %e, "play-state report not accepted by backend");
    }

    state.play_cache.sweep();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn played_add(
    state: State<AppState>,
    Path(item_id): Path<String>,
    req: Request,
) -> AppResult<StatusCode> {
    set_watched(state, item_id, req, true).await
}

pub async fn played_remove(
    state: State<AppState>,
    Path(item_id): Path<String>,
    req: Request,
) -> AppResult<StatusCode> {
    set_watched(state, item_id, req, false).await
}

pub async fn played_add_compat(
    state: State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
    req: Request,
) -> AppResult<StatusCode> {
    set_watched(state, item_id, req, true).await
}

pub async fn played_remove_compat(
    state: State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
    req: Request,
) -> AppResult<StatusCode> {
    set_watched(state, item_id, req, false).await
}

async fn set_watched(
    State(state): State<AppState>,
    item_id: String,
    req: Request,
    watched: bool,
) -> AppResult<StatusCode> {
    let session = req
        .extensions()
        .get::<ClientSession>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;

    let item_guid = state
        .ids
        .internal_id(&item_id)
        .ok_or_else(|| AppError::not_found("Item not found"))?;

    state
        .backend_client(&session.backend_url, &session.backend_token)?
        .set_watched(&item_guid, watched)
        .await?;

    Ok(StatusCode::OK)
}
