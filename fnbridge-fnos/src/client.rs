//! fnOS HTTP client.
//!
//! Wraps every call with Authx signing, bounded redirect following and the
//! signature-error retry the upstream server requires. Redirects are not
//! delegated to reqwest because each hop has to be re-signed for its new
//! path, so the client follows them itself with an explicit hop budget.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::FnosError;
use crate::signature::{authx_string, generate_nonce};
use crate::types::{
    ApiEnvelope, LoginResponse, PlayInfo, PlayRequest, PlayStartResponse, StreamList,
    StreamResponse, UserInfo,
};

#[derive(Debug, Clone)]
pub struct FnosClientOptions {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_redirects: u32,
    pub ignore_cert: bool,
}

impl Default for FnosClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 5,
            retry_delay_ms: 100,
            max_redirects: 5,
            ignore_cert: false,
        }
    }
}

#[derive(Clone)]
pub struct FnosClient {
    base_url: String,
    token: String,
    options: FnosClientOptions,
    http: Client,
}

impl FnosClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        options: FnosClientOptions,
    ) -> Result<Self, FnosError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_millis(options.timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(options.ignore_cert)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            options,
            http,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Signed request that requires a `data` payload in the envelope.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, FnosError> {
        let (data, _) = self.send_enveloped(method, path, body).await?;
        data.ok_or_else(|| FnosError::Parse(format!("{path}: response carried no data")))
    }

    /// Like [`request`](Self::request) but also reports the base URL the
    /// server redirected to, if any. Login uses this to learn the address
    /// the NAS actually serves from.
    pub async fn request_with_relocation<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(T, Option<String>), FnosError> {
        let (data, moved_to) = self.send_enveloped(method, path, body).await?;
        let data =
            data.ok_or_else(|| FnosError::Parse(format!("{path}: response carried no data")))?;
        Ok((data, moved_to))
    }

    /// Signed request for endpoints whose success envelope has a null
    /// `data` field.
    pub async fn request_unit(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(), FnosError> {
        self.send_enveloped::<Value>(method, path, body).await?;
        Ok(())
    }

    async fn send_enveloped<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(Option<T>, Option<String>), FnosError> {
        if !matches!(
            method,
            Method::GET | Method::POST | Method::PUT | Method::DELETE
        ) {
            return Err(FnosError::UnsupportedMethod(method.to_string()));
        }

        // Mutating requests carry a nonce inside the body as well.
        let body_str = if method == Method::GET {
            body.map(|b| b.to_string())
        } else {
            let mut b = body.unwrap_or_else(|| Value::Object(Default::default()));
            if let Some(obj) = b.as_object_mut() {
                obj.insert("nonce".into(), Value::String(generate_nonce()));
            }
            Some(b.to_string())
        };

        let mut base = self.base_url.clone();
        let mut path = path.to_string();
        let mut moved_to: Option<String> = None;
        let mut redirects: u32 = 0;
        let mut attempt: u32 = 0;

        loop {
            // The signature binds the current path and a fresh timestamp,
            // so it is recomputed on every attempt and after every hop.
            let authx = authx_string(&path, body_str.as_deref());
            let url = format!("{base}{path}");
            debug!(method = %method, %url, attempt, "fnos request");

            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("Cookie", "mode=relay")
                .header("Authx", authx);
            if !self.token.is_empty() {
                req = req.header("Authorization", &self.token);
            }
            if method != Method::GET {
                if let Some(ref b) = body_str {
                    // The signed digest covers these exact bytes.
                    req = req.body(b.clone());
                }
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    let err = FnosError::from(e);
                    if attempt >= self.options.max_retries {
                        return Err(err);
                    }
                    warn!(%url, attempt, error = %err, "fnos request failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(self.options.retry_delay_ms)).await;
                    continue;
                }
            };

            let status = response.status();
            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY
                    | StatusCode::FOUND
                    | StatusCode::TEMPORARY_REDIRECT
                    | StatusCode::PERMANENT_REDIRECT
            ) {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let Some(location) = location else {
                    return Err(FnosError::Network(format!("{status} without location")));
                };
                redirects += 1;
                if redirects > self.options.max_redirects {
                    return Err(FnosError::TooManyRedirects);
                }
                if location.starts_with("http") {
                    let parsed = url::Url::parse(&location)
                        .map_err(|e| FnosError::Network(format!("bad redirect target: {e}")))?;
                    let host = parsed
                        .host_str()
                        .ok_or_else(|| FnosError::Network("redirect without host".into()))?;
                    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
                    base = format!("{}://{}{}", parsed.scheme(), host, port);
                    path = match parsed.query() {
                        Some(q) => format!("{}?{q}", parsed.path()),
                        None => parsed.path().to_string(),
                    };
                } else {
                    path = location;
                }
                moved_to = Some(base.clone());
                continue;
            }

            let text = response.text().await.map_err(FnosError::from)?;
            let envelope: ApiEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
                FnosError::Parse(format!(
                    "{path}: {e} (body: {})",
                    &text[..text.len().min(200)]
                ))
            })?;

            if envelope.code == 5000 && envelope.msg.contains("invalid sign") {
                if attempt >= self.options.max_retries {
                    return Err(FnosError::Api {
                        code: envelope.code,
                        message: envelope.msg,
                    });
                }
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(self.options.retry_delay_ms)).await;
                continue;
            }
            if envelope.code != 0 {
                return Err(FnosError::Api {
                    code: envelope.code,
                    message: envelope.msg,
                });
            }
            return Ok((envelope.data, moved_to));
        }
    }

    /// Log in and return the token plus the server base the NAS redirected
    /// to, when it answered from a different address.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, Option<String>), FnosError> {
        let body = json!({
            "app_name": "trimemedia-web",
            "username": username,
            "password": password,
        });
        let (resp, moved_to): (LoginResponse, _) = self
            .request_with_relocation(Method::POST, "/v/api/v1/login", Some(body))
            .await?;
        if resp.token.is_empty() {
            return Err(FnosError::Auth("login returned an empty token".into()));
        }
        Ok((resp.token, moved_to))
    }

    pub async fn user_info(&self) -> Result<UserInfo, FnosError> {
        self.request(Method::GET, "/v/api/v1/user/info", None).await
    }

    pub async fn play_info(&self, item_guid: &str) -> Result<PlayInfo, FnosError> {
        self.request(
            Method::POST,
            "/v/api/v1/play/info",
            Some(json!({ "item_guid": item_guid })),
        )
        .await
    }

    pub async fn stream_list(&self, item_guid: &str) -> Result<StreamList, FnosError> {
        self.request(
            Method::GET,
            &format!("/v/api/v1/stream/list/{item_guid}"),
            None,
        )
        .await
    }

    /// Resolve the byte-stream location of one media file. Cloud-hosted
    /// files answer with direct links, local files with nothing useful
    /// beyond the relay path.
    pub async fn stream(&self, media_guid: &str, client_ip: &str) -> Result<StreamResponse, FnosError> {
        self.request(
            Method::POST,
            "/v/api/v1/stream",
            Some(json!({
                "header": { "User-Agent": ["trim_player"] },
                "level": 1,
                "media_guid": media_guid,
                "ip": client_ip,
            })),
        )
        .await
    }

    /// Start a server-side transcode session.
    pub async fn start_play(&self, request: &PlayRequest) -> Result<PlayStartResponse, FnosError> {
        self.request(
            Method::POST,
            "/v/api/v1/play/play",
            Some(serde_json::to_value(request)?),
        )
        .await
    }

    /// Report playback progress. `ts` is in seconds. `play_link` keeps the
    /// backend's transcode session alive when one is running.
    pub async fn record_play(
        &self,
        item_guid: &str,
        media_guid: &str,
        video_guid: &str,
        ts: f64,
        duration: f64,
        play_link: &str,
    ) -> Result<(), FnosError> {
        self.request_unit(
            Method::POST,
            "/v/api/v1/play/record",
            Some(json!({
                "item_guid": item_guid,
                "media_guid": media_guid,
                "video_guid": video_guid,
                "ts": ts,
                "duration": duration,
                "play_link": play_link,
            })),
        )
        .await
    }

    pub async fn set_watched(&self, item_guid: &str, watched: bool) -> Result<(), FnosError> {
        let method = if watched { Method::POST } else { Method::DELETE };
        self.request_unit(
            method,
            "/v/api/v1/item/watched",
            Some(json!({ "item_guid": item_guid })),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer) -> FnosClient {
        FnosClient::new(
            server.uri(),
            "test-token",
            FnosClientOptions {
                retry_delay_ms: 1,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_unwraps_envelope_and_signs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .and(header("Cookie", "mode=relay"))
            .and(header("Authorization", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "msg": "ok",
                "data": { "uid": 7, "username": "alice", "nickname": "", "avatar": "" }
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).user_info().await.unwrap();
        assert_eq!(info.uid, 7);
        assert_eq!(info.username, "alice");

        let received = server.received_requests().await.unwrap();
        let authx = received[0].headers.get("Authx").unwrap().to_str().unwrap();
        assert!(authx.starts_with("nonce="));
        assert!(authx.contains("&sign="));
    }

    #[tokio::test]
    async fn post_injects_nonce_into_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v/api/v1/play/info"))
            .and(body_string_contains("\"nonce\""))
            .and(body_string_contains("\"item_guid\":\"abc\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "msg": "", "data": { "guid": "abc" }
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).play_info("abc").await.unwrap();
        assert_eq!(info.guid, "abc");
    }

    #[tokio::test]
    async fn invalid_sign_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 5000, "msg": "invalid sign"
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "msg": "", "data": { "uid": 1, "username": "u", "nickname": "", "avatar": "" }
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).user_info().await.unwrap();
        assert_eq!(info.uid, 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn business_error_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 8001, "msg": "no permission"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).user_info().await.unwrap_err();
        match err {
            FnosError::Api { code, message } => {
                assert_eq!(code, 8001);
                assert_eq!(message, "no permission");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn relative_redirect_is_followed_and_resigned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/v/api/v1/user/info2"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "msg": "", "data": { "uid": 2, "username": "u", "nickname": "", "avatar": "" }
            })))
            .mount(&server)
            .await;

        let info = client_for(&server).user_info().await.unwrap();
        assert_eq!(info.uid, 2);
    }

    #[tokio::test]
    async fn redirect_loop_stops_at_hop_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/api/v1/user/info"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/v/api/v1/user/info"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).user_info().await.unwrap_err();
        assert!(matches!(err, FnosError::TooManyRedirects));
    }

    #[tokio::test]
    async fn login_reports_relocated_base() {
        let target = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v/api/v1/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "msg": "", "data": { "token": "tok123" }
            })))
            .mount(&target)
            .await;

        let front = MockServer::start().await;
        let relocated = format!("{}/v/api/v1/login", target.uri());
        Mock::given(method("POST"))
            .and(path("/v/api/v1/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", relocated.as_str()))
            .mount(&front)
            .await;

        let client = FnosClient::new(front.uri(), "", FnosClientOptions::default()).unwrap();
        let (token, moved_to) = client.login("u", "p").await.unwrap();
        assert_eq!(token, "tok123");
        assert_eq!(moved_to.as_deref(), Some(target.uri().as_str()));
    }

    #[tokio::test]
    async fn unexpected_method_is_rejected() {
        let client = FnosClient::new("http://localhost:1", "", FnosClientOptions::default()).unwrap();
        let err = client
            .request::<serde_json::Value>(Method::PATCH, "/x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FnosError::UnsupportedMethod(_)));
    }

    // Pull the request body back out so the signature invariant can be
    // checked against the exact bytes sent.
    #[tokio::test]
    async fn signature_covers_sent_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v/api/v1/play/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "msg": "", "data": { "guid": "g" }
            })))
            .mount(&server)
            .await;

        client_for(&server).play_info("g").await.unwrap();

        let received: Vec<Request> = server.received_requests().await.unwrap();
        let req = &received[0];
        let body = String::from_utf8(req.body.clone()).unwrap();
        let authx = req.headers.get("Authx").unwrap().to_str().unwrap();
        let mut nonce = "";
        let mut timestamp = 0u64;
        let mut sign = "";
        for part in authx.split('&') {
            if let Some(v) = part.strip_prefix("nonce=") {
                nonce = v;
            } else if let Some(v) = part.strip_prefix("timestamp=") {
                timestamp = v.parse().unwrap();
            } else if let Some(v) = part.strip_prefix("sign=") {
                sign = v;
            }
        }
        let expected =
            crate::signature::sign_path("/v/api/v1/play/info", Some(&body), nonce, timestamp);
        assert_eq!(sign, expected);
    }
}
