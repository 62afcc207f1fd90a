// HLS artifact proxying: playlists, subtitle playlists, segments

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::Response,
};
use tracing::{debug, warn};

use fnbridge_core::TranscodeSession;
use fnbridge_fnos::signature::authx_string;
use fnbridge_proxy::playlist::{inject_subtitle_track, to_subtitle_playlist};
use fnbridge_proxy::{fetch_upstream, relay_stream, UpstreamTarget};

use super::middleware::extract_token;
use super::{AppError, AppResult, AppState};

/// Returned to HLS.js when a subtitle segment cannot be fetched; an empty
/// cue list keeps playback running where an error body would stop it.
const EMPTY_WEBVTT: &str = "WEBVTT\nX-TIMESTAMP-MAP=MPEGTS:0,LOCAL:00:00:00.000\n\n";

pub async fn hls_artifact(
    State(state): State<AppState>,
    Path((rendition_id, file)): Path<(String, String)>,
    req: Request,
) -> AppResult<Response> {
    debug!(rendition_id, file, "hls artifact requested");

    // A player's HLS engine fetches segments without any credentials, so a
    // session established earlier supplies them.
    let (token, _) = extract_token(req.headers(), req.uri().query());
    let method = req.method().clone();
    let headers = req.headers().clone();
    drop(req);
    let client_session = token.and_then(|t| state.sessions.get(&t));
    let (backend_url, backend_token) = match &client_session {
        Some(s) => (s.backend_url.clone(), s.backend_token.clone()),
        None => match state.transcode.cached(&rendition_id) {
            Some(cached) => (cached.backend_url, cached.backend_token),
            None => return Err(AppError::unauthorized("No credentials for HLS request")),
        },
    };

    let client = state.backend_client(&backend_url, &backend_token)?;
    let session = state
        .transcode
        .get_or_create(&rendition_id, &backend_url, &backend_token, &client)
        .await?;

    match file.as_str() {
        "main.m3u8" => {
            let master = fetch_playlist(&state, &rendition_id, &backend_url, &backend_token, &session).await?;
            playlist_response(inject_subtitle_track(&master, "subtitle.m3u8"))
        }
        "subtitle.m3u8" => {
            let master = fetch_playlist(&state, &rendition_id, &backend_url, &backend_token, &session).await?;
            playlist_response(to_subtitle_playlist(&master))
        }
        _ if file.ends_with(".vtt") => {
            subtitle_segment(
                &backend_url,
                &backend_token,
                &session,
                &file,
                state.config.backend.ignore_cert,
            )
            .await
        }
        _ => {
            relay_segment(
                &state,
                &rendition_id,
                &backend_url,
                &backend_token,
                session,
                &client,
                &file,
                method,
                headers,
            )
            .await
        }
    }
}

fn hls_target(
    backend_url: &str,
    backend_token: &str,
    path: &str,
    skip_verify: bool,
) -> UpstreamTarget {
    UpstreamTarget {
        url: format!("{backend_url}{path}"),
        headers: vec![
            ("Authorization".into(), backend_token.to_string()),
            ("Cookie".into(), "mode=relay".into()),
            ("Authx".into(), authx_string(path, None)),
        ],
        skip_verify,
    }
}

/// Fetch the backend's master playlist (its conventional name differs from
/// the client-facing one). Playlist refetches do not retry on 410; the
/// session is invalidated and the failure surfaces, while segment fetches
/// self-heal.
async fn fetch_playlist(
    state: &AppState,
    rendition_id: &str,
    backend_url: &str,
    backend_token: &str,
    session: &TranscodeSession,
) -> AppResult<String> {
    let path = format!("/v/media/{}/preset.m3u8", session.session_guid);
    let target = hls_target(backend_url, backend_token, &path, state.config.backend.ignore_cert);

    let fetched = fetch_upstream(
        reqwest::Method::GET,
        &target,
        &axum::http::HeaderMap::new(),
        state.header_timeout(),
    )
    .await?;

    let status = fetched.response.status().as_u16();
    if status == 410 {
        warn!(rendition_id, "backend reports transcode session gone");
        state.transcode.invalidate(rendition_id);
        return Err(AppError::bad_gateway("Transcode session expired"));
    }
    if status != 200 {
        return Err(AppError::bad_gateway(format!(
            "playlist fetch failed with status {status}"
        )));
    }

    fetched
        .response
        .text()
        .await
        .map_err(|e| AppError::bad_gateway(format!("playlist read failed: {e}")))
}

fn playlist_response(body: String) -> AppResult<Response> {
    Response::builder()
        .status(200)
        .header("content-type", "application/vnd.apple.mpegurl")
        .header("access-control-allow-origin", "*")
        .header("cache-control", "no-store, no-cache, must-revalidate")
        .body(Body::from(body))
        .map_err(|e| AppError::internal(e.to_string()))
}

/// Subtitle segments are small and latency-sensitive; a short budget with
/// an empty-cue fallback beats stalling the whole player.
async fn subtitle_segment(
    backend_url: &str,
    backend_token: &str,
    session: &TranscodeSession,
    file: &str,
    ignore_cert: bool,
) -> AppResult<Response> {
    let path = format!("/v/media/{}/{}", session.session_guid, file);
    let target = hls_target(backend_url, backend_token, &path, ignore_cert);

    let body = match fetch_upstream(
        reqwest::Method::GET,
        &target,
        &axum::http::HeaderMap::new(),
        Duration::from_secs(1),
    )
    .await
    {
        Ok(fetched) if fetched.response.status().as_u16() == 200 => {
            match fetched.response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    warn!(file, error = %e, "vtt read failed, serving empty cue list");
                    EMPTY_WEBVTT.as_bytes().to_vec()
                }
            }
        }
        Ok(fetched) => {
            warn!(file, status = fetched.response.status().as_u16(), "vtt fetch failed");
            EMPTY_WEBVTT.as_bytes().to_vec()
        }
        Err(e) => {
            warn!(file, error = %e, "vtt fetch failed, serving empty cue list");
            EMPTY_WEBVTT.as_bytes().to_vec()
        }
    };

    Response::builder()
        .status(200)
        .header("content-type", "text/vtt")
        .header("access-control-allow-origin", "*")
        .header("cache-control", "no-store, no-cache, must-revalidate")
        .body(Body::from(body))
        .map_err(|e| AppError::internal(e.to_string()))
}

/// Stream one media segment. A 410 means the backend discarded the
/// transcode session: rebuild it and retry exactly once; a second 410 is
/// surfaced, never retried.
#[allow(clippy::too_many_arguments)]
async fn relay_segment(
    state: &AppState,
    rendition_id: &str,
    backend_url: &str,
    backend_token: &str,
    session: TranscodeSession,
    client: &fnbridge_fnos::FnosClient,
    file: &str,
    method: axum::http::Method,
    headers: axum::http::HeaderMap,
) -> AppResult<Response> {
    let extension = file.rsplit('.').next();

    let path = format!("/v/media/{}/{}", session.session_guid, file);
    let target = hls_target(backend_url, backend_token, &path, state.config.backend.ignore_cert);
    let fetched = fetch_upstream(method.clone(), &target, &headers, state.header_timeout()).await?;

    if fetched.response.status().as_u16() != 410 {
        return Ok(relay_stream(fetched, extension, true)?);
    }

    warn!(rendition_id, file, "segment gone, rebuilding transcode session");
    state.transcode.invalidate(rendition_id);
    let rebuilt = state
        .transcode
        .get_or_create(rendition_id, backend_url, backend_token, client)
        .await?;

    let path = format!("/v/media/{}/{}", rebuilt.session_guid, file);
    let target = hls_target(backend_url, backend_token, &path, state.config.backend.ignore_cert);
    let fetched = fetch_upstream(method, &target, &headers, state.header_timeout()).await?;

    if fetched.response.status().as_u16() == 410 {
        state.transcode.invalidate(rendition_id);
        return Err(AppError::bad_gateway(
            "Transcode session expired twice in a row",
        ));
    }

    Ok(relay_stream(fetched, extension, true)?)
}
