//! Core services for the fnOS to Jellyfin bridge: configuration, identifier
//! translation, client sessions, rendition resolution and transcode session
//! management. HTTP surfaces live in `fnbridge-api`, wire plumbing in
//! `fnbridge-fnos` and `fnbridge-proxy`.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod models;
pub mod rendition;
pub mod session;
pub mod transcode;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::IdBridge;
pub use session::SessionStore;
pub use transcode::{TranscodeMeta, TranscodeSession, TranscodeSessionManager, TranscodeStarter};
