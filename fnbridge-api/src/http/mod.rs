// Module: http
// Jellyfin-compatible HTTP API in front of an fnOS media backend

pub mod auth;
pub mod error;
pub mod hls;
pub mod middleware;
pub mod playback;
pub mod playstate;
pub mod stream;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware::{from_fn_with_state, map_request},
    routing::{get, post},
    Router,
};
use tower::Layer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fnbridge_core::rendition::RenditionResolver;
use fnbridge_core::{Config, IdBridge, SessionStore, TranscodeSessionManager};
use fnbridge_fnos::{FnosClient, FnosClientOptions};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub ids: Arc<IdBridge>,
    pub renditions: Arc<RenditionResolver>,
    pub transcode: Arc<TranscodeSessionManager>,
    pub play_cache: Arc<playstate::PlayInfoCache>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let persist_path = config.session_persist_path().map(Into::into);
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new(persist_path)),
            ids: Arc::new(IdBridge::new()),
            renditions: Arc::new(RenditionResolver::new()),
            transcode: Arc::new(TranscodeSessionManager::new()),
            play_cache: Arc::new(playstate::PlayInfoCache::default()),
        }
    }

    pub(crate) fn client_options(&self) -> FnosClientOptions {
        FnosClientOptions {
            timeout_ms: self.config.backend.timeout_ms,
            max_retries: self.config.backend.max_retries,
            retry_delay_ms: self.config.backend.retry_delay_ms,
            max_redirects: self.config.backend.max_redirects,
            ignore_cert: self.config.backend.ignore_cert,
        }
    }

    /// Signed client against a concrete backend address and token.
    pub(crate) fn backend_client(
        &self,
        backend_url: &str,
        token: &str,
    ) -> AppResult<FnosClient> {
        FnosClient::new(backend_url, token, self.client_options())
            .map_err(|e| AppError::internal(format!("Failed to build backend client: {e}")))
    }

    /// Tokenless client against the configured backend, used for login.
    pub(crate) fn login_client(&self) -> AppResult<FnosClient> {
        self.backend_client(&self.config.backend.url, "")
    }

    pub(crate) fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.config.proxy.header_timeout_seconds)
    }
}

/// Create the HTTP router with all routes. Path canonicalization wraps the
/// router itself: a `Router::layer` middleware would run after routing and
/// the rewritten path would never be matched.
pub fn create_router(state: AppState) -> Router {
    let authed = || from_fn_with_state(state.clone(), middleware::require_auth);

    let routes = Router::new()
        // login and visibility stubs
        .route("/Users/AuthenticateByName", post(auth::authenticate_by_name))
        .route("/System/Ping", get(system::ping).post(system::ping))
        .route("/System/Info/Public", get(system::info_public))
        .route("/System/Info", get(system::info).layer(authed()))
        // playback-info resolution
        .route(
            "/Items/{itemId}/PlaybackInfo",
            post(playback::playback_info).layer(authed()),
        )
        .route(
            "/Users/{userId}/Items/{itemId}/PlaybackInfo",
            post(playback::playback_info_compat).layer(authed()),
        )
        // play-state reporting
        .route(
            "/Sessions/Playing",
            post(playstate::playing_start).layer(authed()),
        )
        .route(
            "/Sessions/Playing/Progress",
            post(playstate::playing_progress).layer(authed()),
        )
        .route(
            "/Sessions/Playing/Stopped",
            post(playstate::playing_stopped).layer(authed()),
        )
        .route("/Sessions/Playing/Ping", post(playstate::playing_ping))
        .route(
            "/UserPlayedItems/{itemId}",
            post(playstate::played_add)
                .delete(playstate::played_remove)
                .layer(authed()),
        )
        .route(
            "/Users/{userId}/PlayedItems/{itemId}",
            post(playstate::played_add_compat)
                .delete(playstate::played_remove_compat)
                .layer(authed()),
        )
        // byte streaming
        .route(
            "/Videos/{itemId}/stream",
            get(stream::video_stream).layer(authed()),
        )
        .route(
            "/Videos/{itemId}/stream/{ext}",
            get(stream::video_stream_with_ext).layer(authed()),
        )
        .route(
            "/Videos/{itemId}/{mediaSourceId}/Subtitles/{index}/{file}",
            get(stream::subtitle_stream).layer(authed()),
        )
        // HLS artifacts authenticate internally (segment fetches carry no
        // credentials)
        .route("/Videos/{renditionId}/hls/{file}", get(hls::hls_artifact))
        .route("/{renditionId}/hls/{file}", get(hls::hls_artifact))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    Router::new().fallback_service(map_request(middleware::normalize_path).layer(routes))
}
