//! HTTP surface of the fnOS to Jellyfin bridge.
//!
//! Everything a Jellyfin client talks to lives under [`http`]; the binary in
//! `main.rs` is a thin wrapper that loads config, wires the shared state and
//! serves the router.

pub mod http;

pub use http::{create_router, AppState};
