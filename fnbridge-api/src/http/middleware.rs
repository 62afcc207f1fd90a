// HTTP middleware: Jellyfin credential extraction

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{AppError, AppState};

static AUTH_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("static regex"));

/// Canonical casing for the path segments the bridge serves. Xbox and some
/// TV clients lowercase the whole request path.
static PATH_SEGMENT_MAP: &[(&str, &str)] = &[
    ("users", "Users"),
    ("authenticatebyname", "AuthenticateByName"),
    ("system", "System"),
    ("info", "Info"),
    ("public", "Public"),
    ("ping", "Ping"),
    ("items", "Items"),
    ("playbackinfo", "PlaybackInfo"),
    ("sessions", "Sessions"),
    ("playing", "Playing"),
    ("progress", "Progress"),
    ("stopped", "Stopped"),
    ("userplayeditems", "UserPlayedItems"),
    ("playeditems", "PlayedItems"),
    ("videos", "Videos"),
    ("subtitles", "Subtitles"),
    ("stream", "stream"),
    ("hls", "hls"),
];

/// Rewrite the request path to the canonical segment casing, and split the
/// `stream.ext` form into `stream/ext` so the extension survives as a MIME
/// hint. Runs before routing; it must wrap the router rather than be added
/// with `Router::layer`.
pub async fn normalize_path(mut req: Request) -> Request {
    let path = req.uri().path().to_string();
    let lower_path = path.to_lowercase();

    let mut changed = false;
    let segments: Vec<String> = path
        .split('/')
        .map(|seg| {
            let lower = seg.to_lowercase();
            if let Some(ext) = lower.strip_prefix("stream.") {
                // subtitle artifacts end in "Stream.vtt" and stay intact
                if !lower_path.contains("subtitles") {
                    changed = true;
                    return format!("stream/{ext}");
                }
            }
            if let Some((_, canonical)) = PATH_SEGMENT_MAP.iter().find(|(l, _)| *l == lower) {
                if seg != *canonical {
                    changed = true;
                    return (*canonical).to_string();
                }
            }
            seg.to_string()
        })
        .collect();

    if changed {
        let new_path = segments.join("/");
        let query = req
            .uri()
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        if let Ok(uri) = format!("{new_path}{query}").parse() {
            *req.uri_mut() = uri;
        }
    }
    req
}

/// Parsed `Authorization: MediaBrowser ...` header. Jellyfin and Emby
/// clients pack client identity and the access token into one header.
#[derive(Debug, Clone, Default)]
pub struct AuthHeader {
    pub client: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
    pub token: Option<String>,
}

pub fn parse_auth_header(header: &str) -> Option<AuthHeader> {
    if header.is_empty() {
        return None;
    }

    let lower = header.to_lowercase();
    let raw = if lower.starts_with("mediabrowser ") || lower.starts_with("emby ") {
        match header.split_once(' ') {
            Some((_, rest)) => rest,
            None => header,
        }
    } else {
        header
    };

    let mut params = std::collections::HashMap::new();
    for cap in AUTH_PARAM_RE.captures_iter(raw) {
        params.insert(cap[1].to_lowercase(), cap[2].to_string());
    }

    if !params.contains_key("client")
        && !params.contains_key("device")
        && !params.contains_key("token")
    {
        return None;
    }

    Some(AuthHeader {
        client: params
            .get("client")
            .cloned()
            .unwrap_or_else(|| "Unknown".into()),
        device: params
            .get("device")
            .cloned()
            .unwrap_or_else(|| "Unknown".into()),
        device_id: params
            .get("deviceid")
            .cloned()
            .unwrap_or_else(|| "unknown".into()),
        version: params
            .get("version")
            .cloned()
            .unwrap_or_else(|| "0.0.0".into()),
        token: params.get("token").cloned(),
    })
}

/// Access token attached to the request, usable for URL injection later in
/// the pipeline.
#[derive(Debug, Clone)]
pub struct RequestToken(pub String);

/// Pull the access token out of wherever the client put it: the
/// `MediaBrowser` header, an `api_key`/`ApiKey` query parameter, the legacy
/// token headers, or a bare `Authorization` value.
pub fn extract_token(
    headers: &HeaderMap,
    query: Option<&str>,
) -> (Option<String>, Option<AuthHeader>) {
    let auth_value = headers
        .get("Authorization")
        .or_else(|| headers.get("X-Emby-Authorization"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let parsed = parse_auth_header(auth_value);

    if let Some(token) = parsed.as_ref().and_then(|p| p.token.clone()) {
        return (Some(token), parsed);
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == "api_key" || key == "ApiKey" {
                    return (Some(value.to_string()), parsed);
                }
            }
        }
    }

    if let Some(token) = headers
        .get("X-MediaBrowser-Token")
        .or_else(|| headers.get("X-Emby-Token"))
        .and_then(|v| v.to_str().ok())
    {
        return (Some(token.to_string()), parsed);
    }

    // a non-MediaBrowser Authorization value is treated as the raw token
    if !auth_value.is_empty() && parsed.is_none() {
        let raw = auth_value.strip_prefix("Bearer ").unwrap_or(auth_value);
        return (Some(raw.to_string()), None);
    }

    (None, parsed)
}

/// Require a valid client session; inserts the session, its token and the
/// parsed client identity into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let (token, parsed) = extract_token(req.headers(), req.uri().query());

    let Some(token) = token else {
        return AppError::unauthorized("Missing access token").into_response();
    };

    let Some(session) = state.sessions.get(&token) else {
        return AppError::unauthorized("Invalid or expired token").into_response();
    };

    req.extensions_mut().insert(session);
    req.extensions_mut().insert(RequestToken(token));
    if let Some(parsed) = parsed {
        req.extensions_mut().insert(parsed);
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn media_browser_header_parses() {
        let header = r#"MediaBrowser Client="Jellyfin Web", Device="Firefox", DeviceId="abc", Version="10.12.0", Token="tok-1""#;
        let parsed = parse_auth_header(header).unwrap();
        assert_eq!(parsed.client, "Jellyfin Web");
        assert_eq!(parsed.device, "Firefox");
        assert_eq!(parsed.device_id, "abc");
        assert_eq!(parsed.version, "10.12.0");
        assert_eq!(parsed.token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn header_without_known_fields_is_rejected() {
        assert!(parse_auth_header("Basic dXNlcjpwYXNz").is_none());
        assert!(parse_auth_header("").is_none());
    }

    #[test]
    fn token_falls_back_to_query_parameter() {
        let headers = HeaderMap::new();
        let (token, _) = extract_token(&headers, Some("static=true&api_key=tok-2"));
        assert_eq!(token.as_deref(), Some("tok-2"));

        let (token, _) = extract_token(&headers, Some("ApiKey=tok-3"));
        assert_eq!(token.as_deref(), Some("tok-3"));
    }

    #[test]
    fn token_falls_back_to_legacy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Emby-Token", HeaderValue::from_static("tok-4"));
        let (token, _) = extract_token(&headers, None);
        assert_eq!(token.as_deref(), Some("tok-4"));
    }

    #[test]
    fn bare_authorization_is_a_raw_token() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer tok-5"));
        let (token, parsed) = extract_token(&headers, None);
        assert_eq!(token.as_deref(), Some("tok-5"));
        assert!(parsed.is_none());
    }

    #[test]
    fn header_token_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_static(r#"MediaBrowser Token="header-tok""#),
        );
        let (token, _) = extract_token(&headers, Some("api_key=query-tok"));
        assert_eq!(token.as_deref(), Some("header-tok"));
    }

    async fn normalized(uri: &str) -> String {
        let req = Request::builder()
            .uri(uri)
            .body(axum::body::Body::empty())
            .unwrap();
        normalize_path(req).await.uri().to_string()
    }

    #[tokio::test]
    async fn lowercased_segments_are_canonicalized() {
        assert_eq!(normalized("/system/info/public").await, "/System/Info/Public");
        assert_eq!(
            normalized("/users/authenticatebyname").await,
            "/Users/AuthenticateByName"
        );
        assert_eq!(
            normalized("/sessions/playing/progress").await,
            "/Sessions/Playing/Progress"
        );
    }

    #[tokio::test]
    async fn stream_extension_becomes_its_own_segment() {
        assert_eq!(
            normalized("/Videos/abc/stream.mp4?mediaSourceId=m1").await,
            "/Videos/abc/stream/mp4?mediaSourceId=m1"
        );
        assert_eq!(
            normalized("/videos/abc/Stream.MKV").await,
            "/Videos/abc/stream/mkv"
        );
    }

    #[tokio::test]
    async fn subtitle_artifacts_keep_their_name() {
        assert_eq!(
            normalized("/Videos/i/m1/Subtitles/2/Stream.vtt").await,
            "/Videos/i/m1/Subtitles/2/Stream.vtt"
        );
    }

    #[tokio::test]
    async fn canonical_paths_pass_through_untouched() {
        assert_eq!(
            normalized("/Videos/m1/hls/main.m3u8?api_key=t").await,
            "/Videos/m1/hls/main.m3u8?api_key=t"
        );
    }
}
