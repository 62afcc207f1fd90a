//! Streaming reverse proxy primitives.
//!
//! Fetches media from the backend (or a cloud direct link) and relays it to
//! the client as a live byte stream. The body is never materialized; only
//! the response-header phase is time-bounded. Route wiring lives in
//! `fnbridge-api`, playlist text manipulation in [`playlist`].

pub mod playlist;

use std::time::Duration;

use axum::{
    body::Body,
    http::HeaderMap,
    response::Response,
};
use reqwest::Method;
use thiserror::Error;
use tracing::debug;

/// Client request headers copied to the upstream request.
pub const PASSTHROUGH_HEADERS: &[&str] = &[
    "user-agent",
    "accept",
    "accept-language",
    "accept-encoding",
    "cache-control",
    "pragma",
    "range",
    "if-range",
    "if-modified-since",
    "if-none-match",
];

/// Upstream response headers copied back to the client.
pub const FORWARD_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-range",
    "accept-ranges",
    "cache-control",
    "etag",
    "last-modified",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Upstream did not answer with headers inside the budget.
    #[error("upstream header timeout")]
    HeaderTimeout,

    #[error("upstream certificate error: {0}")]
    Certificate(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("failed to build response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = source {
            let text = e.to_string();
            if text.contains("certificate") || text.contains("CertificateError") {
                return Self::Certificate(err.to_string());
            }
            source = e.source();
        }
        if err.is_timeout() {
            Self::HeaderTimeout
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

/// Where one upstream fetch goes and what it must carry.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub url: String,
    /// Destination-specific headers layered over the passthrough set,
    /// e.g. signing headers for the NAS or a synthetic user agent for a
    /// cloud host.
    pub headers: Vec<(String, String)>,
    /// Only honoured for the NAS itself. Cloud hosts are always verified.
    pub skip_verify: bool,
}

#[derive(Debug)]
pub struct FetchedResponse {
    pub response: reqwest::Response,
    /// The client sent no `Range`, so one was synthesized. Drives the
    /// 206 to 200 rewrite in [`relay_stream`].
    pub range_synthesized: bool,
}

/// Issue the upstream request. Returns once response headers arrive; the
/// body has not been read.
pub async fn fetch_upstream(
    method: Method,
    target: &UpstreamTarget,
    client_headers: &HeaderMap,
    header_timeout: Duration,
) -> Result<FetchedResponse, ProxyError> {
    // No client-wide timeout: body streaming of large media must be able
    // to outlive any fixed duration. The header phase is bounded below.
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(target.skip_verify)
        .build()?;

    let mut request = client.request(method, &target.url);
    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = client_headers.get(*name) {
            request = request.header(*name, value);
        }
    }
    for (name, value) in &target.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    // The backend's range endpoint rejects requests without a Range header.
    let range_synthesized = !client_headers.contains_key("range");
    if range_synthesized {
        request = request.header("range", "bytes=0-");
    }

    let response = tokio::time::timeout(header_timeout, request.send())
        .await
        .map_err(|_| ProxyError::HeaderTimeout)?
        .map_err(ProxyError::from)?;

    debug!(url = %target.url, status = %response.status(), "upstream responded");
    Ok(FetchedResponse {
        response,
        range_synthesized,
    })
}

/// Relay an upstream response to the client, streaming the body.
///
/// When the range was synthesized and the upstream replied 206, the client
/// sees a plain 200 with `Content-Length` taken from the range total,
/// because browser video elements refuse a 206 they did not ask for.
pub fn relay_stream(
    fetched: FetchedResponse,
    extension_hint: Option<&str>,
    no_store: bool,
) -> Result<Response, ProxyError> {
    let resp = fetched.response;
    let upstream_status = resp.status().as_u16();

    let downgraded = fetched.range_synthesized && upstream_status == 206;
    let status = if downgraded { 200 } else { upstream_status };
    // total length from "bytes 0-4999/5000"; an unknown total ("/*")
    // yields a 200 with no length at all
    let total_size = if downgraded {
        resp.headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|cr| cr.rsplit('/').next())
            .and_then(|s| s.parse::<u64>().ok())
    } else {
        None
    };

    let upstream_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let generic_type = upstream_type.is_empty() || upstream_type == "application/octet-stream";

    let mut builder = Response::builder()
        .status(status)
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-headers", "*");

    for name in FORWARD_HEADERS {
        // the downgraded 200 must not carry partial-content headers; the
        // upstream length describes the partial body, not the file
        if downgraded
            && (name.eq_ignore_ascii_case("content-range")
                || name.eq_ignore_ascii_case("content-length"))
        {
            continue;
        }
        if no_store && name.eq_ignore_ascii_case("cache-control") {
            continue;
        }
        if generic_type && name.eq_ignore_ascii_case("content-type") {
            continue;
        }
        if let Some(value) = resp.headers().get(*name) {
            builder = builder.header(*name, value);
        }
    }
    if let Some(total) = total_size {
        builder = builder.header("content-length", total.to_string());
    }
    if no_store {
        builder = builder.header("cache-control", "no-store, no-cache, must-revalidate");
    }
    if generic_type {
        builder = builder.header("content-type", mime_for_extension(extension_hint));
    }

    let body = Body::from_stream(resp.bytes_stream());
    builder
        .body(body)
        .map_err(|e| ProxyError::Response(e.to_string()))
}

/// Media MIME type from a file-extension hint. Falls back to mp4, which
/// players treat as "probe it yourself".
#[must_use]
pub fn mime_for_extension(extension: Option<&str>) -> &'static str {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("ts") => "video/mp2t",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("mp3") => "audio/mpeg",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("vtt") => "text/vtt",
        _ => "video/mp4",
    }
}
