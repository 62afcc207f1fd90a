// Playback-info assembly: the composition point between the rendition
// resolver and the transcode session manager

use axum::{
    extract::{Path, Request, State},
    Json,
};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use fnbridge_core::models::{MediaSourceInfo, PlaybackInfoResponse};
use fnbridge_core::session::ClientSession;
use fnbridge_core::TranscodeMeta;
use fnbridge_fnos::types::StreamList;

use super::middleware::RequestToken;
use super::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaybackInfoRequest {
    #[serde(rename = "MediaSourceId")]
    media_source_id: Option<String>,
    #[serde(rename = "EnableDirectStream")]
    enable_direct_stream: Option<bool>,
    #[serde(rename = "EnableDirectPlay")]
    enable_direct_play: Option<bool>,
    #[serde(rename = "MaxStreamingBitrate")]
    max_streaming_bitrate: Option<i64>,
}

pub async fn playback_info(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    req: Request,
) -> AppResult<Json<PlaybackInfoResponse>> {
    assemble(state, item_id, req).await
}

pub async fn playback_info_compat(
    State(state): State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
    req: Request,
) -> AppResult<Json<PlaybackInfoResponse>> {
    assemble(state, item_id, req).await
}

async fn assemble(
    state: AppState,
    item_id: String,
    req: Request,
) -> AppResult<Json<PlaybackInfoResponse>> {
    let session = req
        .extensions()
        .get::<ClientSession>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;
    let token = req.extensions().get::<RequestToken>().map(|t| t.0.clone());

    // clients send anything from a full DTO to an empty body here
    let body = match axum::body::to_bytes(req.into_body(), 64 * 1024).await {
        Ok(bytes) => serde_json::from_slice::<PlaybackInfoRequest>(&bytes).unwrap_or_default(),
        Err(_) => PlaybackInfoRequest::default(),
    };

    let item_guid = state
        .ids
        .internal_id(&item_id)
        .ok_or_else(|| AppError::not_found("Item not found"))?;

    let client = state.backend_client(&session.backend_url, &session.backend_token)?;
    let play_info = client
        .play_info(&item_guid)
        .await
        .map_err(|e| AppError::not_found(format!("Play info not found: {e}")))?;
    let streams = client
        .stream_list(&item_guid)
        .await
        .map_err(|e| AppError::not_found(format!("Stream info not found: {e}")))?;

    let mut sources =
        state
            .renditions
            .build_sources(&item_id, &streams, play_info.item.duration);

    if let Some(requested) = body
        .media_source_id
        .as_deref()
        .filter(|id| !id.is_empty())
    {
        match sources.iter().position(|s| s.id == requested) {
            Some(pos) => {
                let selected = sources.swap_remove(pos);
                sources = vec![selected];
                debug!(media_source_id = requested, "returning the requested rendition only");
            }
            None => warn!(media_source_id = requested, "requested rendition not among sources"),
        }
    }

    for source in &mut sources {
        state.ids.register_rendition_owner(&source.id, &item_guid);
        register_transcode_meta(&state, source, &streams, &item_guid, play_info.item.duration);
        apply_caller_constraints(source, &body);
        if let Some(token) = &token {
            inject_api_key(source, token);
        }
    }

    Ok(Json(PlaybackInfoResponse {
        media_sources: sources,
        play_session_id: Uuid::new_v4().simple().to_string(),
    }))
}

/// Remember everything `play/play` will need if this rendition later falls
/// back to HLS.
fn register_transcode_meta(
    state: &AppState,
    source: &MediaSourceInfo,
    streams: &StreamList,
    item_guid: &str,
    duration: f64,
) {
    let video = streams
        .video_streams
        .iter()
        .find(|v| v.media_guid == source.id);
    let audio = streams
        .audio_streams
        .iter()
        .find(|a| a.media_guid == source.id);

    let (Some(video), Some(audio)) = (video, audio) else {
        return;
    };

    state.transcode.register_meta(TranscodeMeta {
        media_guid: source.id.clone(),
        item_guid: item_guid.to_string(),
        video_guid: video.guid.clone(),
        video_encoder: if video.codec_name.is_empty() {
            "h264".into()
        } else {
            video.codec_name.clone()
        },
        resolution: video
            .resolution_type
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "1080p".into()),
        bitrate: video.bps.unwrap_or(15_000_000),
        audio_guid: audio.guid.clone(),
        subtitle_guid: String::new(),
        channels: audio.channels.unwrap_or(2) as i32,
        duration,
    });
}

/// A caller that rules out direct playback, or caps bandwidth below the
/// rendition's bitrate, gets transcode-only flags in this response.
fn apply_caller_constraints(source: &mut MediaSourceInfo, body: &PlaybackInfoRequest) {
    if body.enable_direct_play == Some(false) {
        source.supports_direct_play = false;
    }
    let over_budget = matches!(
        (body.max_streaming_bitrate, source.bitrate),
        (Some(max), Some(bitrate)) if bitrate > max
    );
    if body.enable_direct_stream == Some(false) || over_budget {
        source.supports_direct_stream = false;
        source.supports_direct_play = false;
        if source.transcoding_sub_protocol.is_none() {
            source.transcoding_sub_protocol = Some("hls".into());
        }
    }
}

fn with_api_key(url: &str, token: &str) -> String {
    let sep = if url.contains('?') { "&" } else { "?" };
    format!("{url}{sep}api_key={token}")
}

/// Streaming URLs are fetched by player internals that do not attach the
/// Authorization header, so the token rides along as a query parameter.
fn inject_api_key(source: &mut MediaSourceInfo, token: &str) {
    if !source.transcoding_url.is_empty() {
        source.transcoding_url = with_api_key(&source.transcoding_url, token);
    }
    if !source.direct_stream_url.is_empty() {
        source.direct_stream_url = with_api_key(&source.direct_stream_url, token);
    }
    for stream in &mut source.media_streams {
        if stream.stream_type == "Subtitle" {
            if let Some(url) = stream.delivery_url.take() {
                stream.delivery_url = Some(with_api_key(&url, token));
            }
        }
    }
}
