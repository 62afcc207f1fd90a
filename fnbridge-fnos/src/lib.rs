// fnOS ("Trim Media") client
//
// Pure HTTP client for the fnOS video service: Authx request signing, the
// signed JSON request loop (bounded redirect chasing, invalid-signature
// retry) and typed API payloads. Independent of the bridge's HTTP surface.

pub mod client;
pub mod error;
pub mod signature;
pub mod types;

pub use client::{FnosClient, FnosClientOptions};
pub use error::FnosError;
