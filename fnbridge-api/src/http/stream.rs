// Direct byte-stream proxying and subtitle delivery

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    response::Response,
};
use serde::Deserialize;
use tracing::debug;

use fnbridge_core::session::ClientSession;
use fnbridge_fnos::signature::authx_string;
use fnbridge_fnos::types::StreamResponse;
use fnbridge_proxy::{fetch_upstream, relay_stream, UpstreamTarget};

use super::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "mediaSourceId")]
    media_source_id: Option<String>,
}

pub async fn video_stream(
    state: State<AppState>,
    Path(item_id): Path<String>,
    query: Query<StreamQuery>,
    req: Request,
) -> AppResult<Response> {
    relay_video(state, item_id, None, query, req).await
}

pub async fn video_stream_with_ext(
    state: State<AppState>,
    Path((item_id, ext)): Path<(String, String)>,
    query: Query<StreamQuery>,
    req: Request,
) -> AppResult<Response> {
    relay_video(state, item_id, Some(ext), query, req).await
}

async fn relay_video(
    State(state): State<AppState>,
    item_id: String,
    ext: Option<String>,
    Query(query): Query<StreamQuery>,
    req: Request,
) -> AppResult<Response> {
    let session = req
        .extensions()
        .get::<ClientSession>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;

    let item_guid = state
        .ids
        .internal_id(&item_id)
        .ok_or_else(|| AppError::not_found("Item not found"))?;

    let client = state.backend_client(&session.backend_url, &session.backend_token)?;

    // the rendition either comes from the client or from the backend's own
    // pick for the item
    let media_guid = match query.media_source_id.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => {
            client
                .play_info(&item_guid)
                .await
                .map_err(|e| AppError::not_found(format!("Play info not found: {e}")))?
                .media_guid
        }
    };

    // cloud files need the descriptor; NAS files work without one
    let descriptor = client.stream(&media_guid, "127.0.0.1").await.ok();
    let target = build_upstream_target(
        &session,
        &media_guid,
        descriptor.as_ref(),
        state.config.backend.ignore_cert,
    );
    debug!(item_id, media_guid, url = %target.url, "relaying byte stream");

    let fetched = fetch_upstream(
        req.method().clone(),
        &target,
        req.headers(),
        state.header_timeout(),
    )
    .await?;

    Ok(relay_stream(fetched, ext.as_deref(), false)?)
}

/// Decide where the bytes come from: a cloud-storage direct link when the
/// backend hands one out, otherwise the NAS range endpoint with signed
/// headers. Cloud hosts always get certificate verification.
pub(crate) fn build_upstream_target(
    session: &ClientSession,
    media_guid: &str,
    descriptor: Option<&StreamResponse>,
    ignore_cert: bool,
) -> UpstreamTarget {
    if let Some(descriptor) = descriptor {
        let direct = descriptor
            .direct_link_qualities
            .as_ref()
            .filter(|q| !q.is_empty())
            .and_then(|q| q.first())
            .filter(|_| descriptor.cloud_storage_info.is_some());
        if let Some(quality) = direct {
            let mut headers = Vec::new();
            if let Some(cookies) = descriptor
                .header
                .as_ref()
                .and_then(|h| h.cookie.as_ref())
                .filter(|c| !c.is_empty())
            {
                headers.push(("Cookie".to_string(), cookies.join("; ")));
            }
            if let Some(info) = &descriptor.cloud_storage_info {
                match info.cloud_storage_type {
                    3 => headers.push(("User-Agent".into(), "trim_player".into())),
                    1 => headers.push(("User-Agent".into(), "pan.baidu.com".into())),
                    _ => {}
                }
            }
            return UpstreamTarget {
                url: quality.url.clone(),
                headers,
                skip_verify: false,
            };
        }
    }

    let media_path = format!("/v/api/v1/media/range/{media_guid}");
    UpstreamTarget {
        url: format!("{}{}", session.backend_url, media_path),
        headers: vec![
            ("Authorization".into(), session.backend_token.clone()),
            ("Cookie".into(), "mode=relay".into()),
            ("Authx".into(), authx_string(&media_path, None)),
        ],
        skip_verify: ignore_cert,
    }
}

/// External subtitle delivery. Small payloads, so this is a buffered fetch
/// rather than a stream.
pub async fn subtitle_stream(
    State(state): State<AppState>,
    Path((item_id, media_source_id, index, file)): Path<(String, String, i32, String)>,
    req: Request,
) -> AppResult<Response> {
    let session = req
        .extensions()
        .get::<ClientSession>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Missing session"))?;

    // the final segment is "Stream.vtt" or similar
    let format = file.rsplit('.').next().unwrap_or("").to_lowercase();

    debug!(item_id, media_source_id, index, format, "subtitle request");

    let info = state
        .renditions
        .subtitle_info(&media_source_id, index)
        .filter(|i| !i.guid.is_empty())
        .ok_or_else(|| AppError::not_found("Subtitle not found"))?;

    let subtitle_path = format!("/v/api/v1/media/subtitle?guid={}", info.guid);
    let target_url = format!("{}{}", session.backend_url, subtitle_path);

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(state.config.backend.ignore_cert)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::internal(format!("Failed to build client: {e}")))?;

    let response = client
        .get(&target_url)
        .header("Authorization", &session.backend_token)
        .header("Cookie", "mode=relay")
        .header("Authx", authx_string(&subtitle_path, None))
        .send()
        .await
        .map_err(|e| AppError::bad_gateway(format!("Subtitle fetch failed: {e}")))?;

    if response.status().as_u16() != 200 {
        return Err(AppError::not_found("Subtitle not found"));
    }

    let content_type = if format == "vtt" || format == "webvtt" {
        "text/vtt"
    } else {
        "application/octet-stream"
    };
    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::bad_gateway(format!("Subtitle fetch failed: {e}")))?;

    Response::builder()
        .status(200)
        .header("content-type", content_type)
        .header("access-control-allow-origin", "*")
        .body(Body::from(body))
        .map_err(|e| AppError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnbridge_fnos::types::{CloudStorageInfo, DirectLinkQuality, StreamHeader};

    fn session() -> ClientSession {
        ClientSession {
            backend_token: "fnos-tok".into(),
            backend_url: "https://nas:5666".into(),
            user_id: "u".into(),
            username: "alice".into(),
            client: "web".into(),
            device_id: "d".into(),
            device_name: "dev".into(),
            app_version: "1".into(),
            created_at: 0,
            last_activity: 0,
        }
    }

    #[test]
    fn nas_target_carries_signed_headers() {
        let target = build_upstream_target(&session(), "m1", None, true);
        assert_eq!(target.url, "https://nas:5666/v/api/v1/media/range/m1");
        assert!(target.skip_verify);
        let names: Vec<&str> = target.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Authorization", "Cookie", "Authx"]);
        assert_eq!(target.headers[1].1, "mode=relay");
    }

    #[test]
    fn cloud_target_uses_direct_link_and_verifies_tls() {
        let descriptor = StreamResponse {
            cloud_storage_info: Some(CloudStorageInfo {
                cloud_storage_type: 3,
            }),
            direct_link_qualities: Some(vec![DirectLinkQuality {
                url: "https://cloud.example/v.mp4".into(),
            }]),
            header: Some(StreamHeader {
                cookie: Some(vec!["a=1".into(), "b=2".into()]),
            }),
        };
        let target = build_upstream_target(&session(), "m1", Some(&descriptor), true);
        assert_eq!(target.url, "https://cloud.example/v.mp4");
        assert!(!target.skip_verify);
        assert!(target
            .headers
            .contains(&("Cookie".to_string(), "a=1; b=2".to_string())));
        assert!(target
            .headers
            .contains(&("User-Agent".to_string(), "trim_player".to_string())));
    }

    #[test]
    fn cloud_descriptor_without_links_falls_back_to_nas() {
        let descriptor = StreamResponse {
            cloud_storage_info: Some(CloudStorageInfo {
                cloud_storage_type: 1,
            }),
            direct_link_qualities: Some(vec![]),
            header: None,
        };
        let target = build_upstream_target(&session(), "m1", Some(&descriptor), false);
        assert!(target.url.starts_with("https://nas:5666/"));
        assert!(!target.skip_verify);
    }
}
