//! Transcode session management.
//!
//! Starting a transcode on the backend is expensive and the player fetches
//! playlist and segments concurrently, so session creation is single-flight
//! per rendition: one caller starts the session while the rest wait and
//! reuse it. A session invalidated after the backend discarded it is
//! rebuilt the same way.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{info, warn};

use fnbridge_fnos::types::{PlayRequest, PlayStartResponse};
use fnbridge_fnos::{FnosClient, FnosError};

use crate::error::{Error, Result};

/// The transcoded artifacts live under `/v/media/{session}/` on the backend.
static SESSION_GUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v/media/([^/]+)/").expect("static regex"));

/// Everything needed to start (or restart) a transcode for one rendition.
/// Captured during playback-info resolution.
#[derive(Debug, Clone)]
pub struct TranscodeMeta {
    pub media_guid: String,
    pub item_guid: String,
    pub video_guid: String,
    pub video_encoder: String,
    pub resolution: String,
    pub bitrate: i64,
    pub audio_guid: String,
    pub subtitle_guid: String,
    pub channels: i32,
    pub duration: f64,
}

impl TranscodeMeta {
    #[must_use]
    pub fn to_play_request(&self) -> PlayRequest {
        PlayRequest {
            media_guid: self.media_guid.clone(),
            video_guid: self.video_guid.clone(),
            video_encoder: self.video_encoder.clone(),
            resolution: self.resolution.clone(),
            bitrate: self.bitrate,
            start_timestamp: 0,
            audio_encoder: "aac".into(),
            audio_guid: self.audio_guid.clone(),
            subtitle_guid: self.subtitle_guid.clone(),
            channels: self.channels,
            forced_sdr: 0,
        }
    }
}

/// A live transcode session on the backend.
///
/// Carries the backend address and credential that created it, because HLS
/// segment fetches from a player's internal engine arrive without any
/// client credentials and must reuse the ones already established.
#[derive(Debug, Clone)]
pub struct TranscodeSession {
    pub session_guid: String,
    pub play_link: String,
    pub backend_url: String,
    pub backend_token: String,
}

/// Seam over `play/play` so session management is testable without a
/// backend.
#[async_trait]
pub trait TranscodeStarter: Send + Sync {
    async fn start(&self, request: &PlayRequest) -> std::result::Result<PlayStartResponse, FnosError>;
}

#[async_trait]
impl TranscodeStarter for FnosClient {
    async fn start(&self, request: &PlayRequest) -> std::result::Result<PlayStartResponse, FnosError> {
        self.start_play(request).await
    }
}

#[derive(Default)]
pub struct TranscodeSessionManager {
    meta: DashMap<String, TranscodeMeta>,
    sessions: DashMap<String, TranscodeSession>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TranscodeSessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_meta(&self, meta: TranscodeMeta) {
        self.meta.insert(meta.media_guid.clone(), meta);
    }

    #[must_use]
    pub fn meta(&self, media_guid: &str) -> Option<TranscodeMeta> {
        self.meta.get(media_guid).map(|v| v.value().clone())
    }

    /// Session already running for this rendition, if any. Never starts one.
    #[must_use]
    pub fn cached(&self, media_guid: &str) -> Option<TranscodeSession> {
        self.sessions.get(media_guid).map(|v| v.value().clone())
    }

    /// Drop a session the backend no longer honours. The next
    /// [`get_or_create`](Self::get_or_create) starts a fresh one.
    pub fn invalidate(&self, media_guid: &str) {
        if self.sessions.remove(media_guid).is_some() {
            info!(media_guid, "transcode session invalidated");
        }
    }

    /// Return the session for this rendition, starting one if none exists.
    /// Concurrent callers for the same rendition share a single start call.
    pub async fn get_or_create(
        &self,
        media_guid: &str,
        backend_url: &str,
        backend_token: &str,
        starter: &dyn TranscodeStarter,
    ) -> Result<TranscodeSession> {
        if let Some(session) = self.cached(media_guid) {
            return Ok(session);
        }

        let lock = self
            .locks
            .entry(media_guid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A concurrent caller may have created it while we waited.
        if let Some(session) = self.cached(media_guid) {
            return Ok(session);
        }

        let meta = self
            .meta(media_guid)
            .ok_or_else(|| Error::NoTranscodeMetadata(media_guid.to_string()))?;

        info!(media_guid, "starting transcode session");
        let response = starter.start(&meta.to_play_request()).await.map_err(|e| {
            warn!(media_guid, error = %e, "transcode start failed");
            Error::from(e)
        })?;

        if response.play_link.is_empty() {
            return Err(Error::Upstream("play/play returned an empty play link".into()));
        }
        let session_guid = SESSION_GUID_RE
            .captures(&response.play_link)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                Error::Upstream(format!(
                    "play link carries no session guid: {}",
                    response.play_link
                ))
            })?;

        let session = TranscodeSession {
            session_guid: session_guid.clone(),
            play_link: response.play_link,
            backend_url: backend_url.to_string(),
            backend_token: backend_token.to_string(),
        };
        self.sessions.insert(media_guid.to_string(), session.clone());
        info!(media_guid, session_guid, "transcode session created");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingStarter {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingStarter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranscodeStarter for CountingStarter {
        async fn start(
            &self,
            request: &PlayRequest,
        ) -> std::result::Result<PlayStartResponse, FnosError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            // simulate the backend taking a moment
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail {
                return Err(FnosError::Api {
                    code: 8000,
                    message: "cannot transcode".into(),
                });
            }
            Ok(PlayStartResponse {
                play_link: format!("/v/media/session-{n}/preset.m3u8"),
                media_guid: request.media_guid.clone(),
                video_guid: request.video_guid.clone(),
                audio_guid: request.audio_guid.clone(),
                hls_time: 6,
            })
        }
    }

    fn meta(media_guid: &str) -> TranscodeMeta {
        TranscodeMeta {
            media_guid: media_guid.into(),
            item_guid: "item-1".into(),
            video_guid: "video-1".into(),
            video_encoder: "h264".into(),
            resolution: "1080P".into(),
            bitrate: 4_000_000,
            audio_guid: "audio-1".into(),
            subtitle_guid: String::new(),
            channels: 2,
            duration: 3600.0,
        }
    }

    #[tokio::test]
    async fn missing_meta_is_an_error() {
        let manager = TranscodeSessionManager::new();
        let starter = CountingStarter::new();
        let err = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap_err();
        assert!(matches!(err, Error::NoTranscodeMetadata(_)));
        assert_eq!(starter.count(), 0);
    }

    #[tokio::test]
    async fn session_is_created_once_and_cached() {
        let manager = TranscodeSessionManager::new();
        manager.register_meta(meta("m1"));
        let starter = CountingStarter::new();

        let first = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap();
        assert_eq!(first.session_guid, "session-1");
        // credentials travel with the session for unauthenticated fetches
        assert_eq!(first.backend_url, "http://nas:5666");
        assert_eq!(first.backend_token, "tok");
        let second = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap();
        assert_eq!(second.session_guid, "session-1");
        assert_eq!(starter.count(), 1);
        assert_eq!(manager.cached("m1").unwrap().session_guid, "session-1");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_start() {
        let manager = Arc::new(TranscodeSessionManager::new());
        manager.register_meta(meta("m1"));
        let starter = Arc::new(CountingStarter::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let starter = starter.clone();
            handles.push(tokio::spawn(async move {
                manager.get_or_create("m1", "http://nas:5666", "tok", starter.as_ref()).await
            }));
        }
        let mut guids = Vec::new();
        for handle in handles {
            guids.push(handle.await.unwrap().unwrap().session_guid);
        }
        assert!(guids.iter().all(|g| g == "session-1"));
        assert_eq!(starter.count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_session() {
        let manager = TranscodeSessionManager::new();
        manager.register_meta(meta("m1"));
        let starter = CountingStarter::new();

        let first = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap();
        manager.invalidate("m1");
        assert!(manager.cached("m1").is_none());
        let second = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap();
        assert_ne!(first.session_guid, second.session_guid);
        assert_eq!(starter.count(), 2);
    }

    #[tokio::test]
    async fn start_failure_maps_to_upstream_error() {
        let manager = TranscodeSessionManager::new();
        manager.register_meta(meta("m1"));
        let starter = CountingStarter::failing();
        let err = manager.get_or_create("m1", "http://nas:5666", "tok", &starter).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
        assert!(manager.cached("m1").is_none());
    }

    #[test]
    fn play_request_fixes_audio_encoder_and_start() {
        let req = meta("m1").to_play_request();
        assert_eq!(req.audio_encoder, "aac");
        assert_eq!(req.start_timestamp, 0);
        assert_eq!(req.forced_sdr, 0);
    }
}
