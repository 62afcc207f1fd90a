//! Identifier translation between fnOS GUIDs and the UUIDs Jellyfin clients
//! expect.
//!
//! The forward direction is a pure UUID v5 over a fixed namespace, so the
//! same GUID always maps to the same external id without any stored state.
//! The reverse direction is learned: every forward mapping records its
//! inverse, and rendition ids additionally record which item owns them.

use dashmap::DashMap;
use uuid::Uuid;

const NAMESPACE: Uuid = Uuid::from_bytes([
    0xf6, 0xb5, 0xc8, 0xa0, 0x3d, 0x2e, 0x4f, 0x1a, 0x9b, 0x8c, 0x7d, 0x6e, 0x5f, 0x4a, 0x3b,
    0x2c,
]);

#[derive(Debug, Default)]
pub struct IdBridge {
    /// External UUID (lowercase) to fnOS GUID.
    reverse: DashMap<String, String>,
    /// Rendition id (lowercase) to the item GUID it belongs to.
    rendition_owner: DashMap<String, String>,
}

impl IdBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an fnOS GUID to its external UUID, remembering the inverse.
    pub fn external_id(&self, guid: &str) -> String {
        let id = Uuid::new_v5(&NAMESPACE, guid.as_bytes()).to_string();
        self.reverse.insert(id.clone(), guid.to_string());
        id
    }

    /// Resolve an id a client sent back to the fnOS GUID it stands for.
    /// Falls back to the rendition-owner table so a rendition id can stand
    /// in for its item.
    #[must_use]
    pub fn internal_id(&self, external: &str) -> Option<String> {
        let key = external.to_lowercase();
        if let Some(guid) = self.reverse.get(&key) {
            return Some(guid.value().clone());
        }
        self.rendition_owner.get(&key).map(|v| v.value().clone())
    }

    pub fn register_rendition_owner(&self, rendition: &str, item_guid: &str) {
        self.rendition_owner
            .insert(rendition.to_lowercase(), item_guid.to_string());
    }

    pub fn register_reverse(&self, external: &str, guid: &str) {
        self.reverse
            .insert(external.to_lowercase(), guid.to_string());
    }

    /// Deterministic server id derived from the backend URL.
    #[must_use]
    pub fn server_id(backend_url: &str) -> String {
        Uuid::new_v5(&NAMESPACE, backend_url.as_bytes()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_mapping_is_deterministic() {
        let ids = IdBridge::new();
        let a = ids.external_id("abc123");
        let b = ids.external_id("abc123");
        assert_eq!(a, b);
        assert_ne!(a, ids.external_id("abc124"));
        // v5, variant 1
        let parsed = Uuid::parse_str(&a).unwrap();
        assert_eq!(parsed.get_version_num(), 5);
    }

    #[test]
    fn forward_mapping_learns_reverse() {
        let ids = IdBridge::new();
        let external = ids.external_id("item-guid-1");
        assert_eq!(ids.internal_id(&external).as_deref(), Some("item-guid-1"));
        assert_eq!(
            ids.internal_id(&external.to_uppercase()).as_deref(),
            Some("item-guid-1")
        );
    }

    #[test]
    fn unknown_id_resolves_to_none() {
        let ids = IdBridge::new();
        assert!(ids.internal_id("ffffffff-ffff-ffff-ffff-ffffffffffff").is_none());
    }

    #[test]
    fn rendition_owner_is_a_fallback() {
        let ids = IdBridge::new();
        ids.register_rendition_owner("MEDIA-1", "item-1");
        assert_eq!(ids.internal_id("media-1").as_deref(), Some("item-1"));
        // direct reverse entries win
        ids.register_reverse("media-1", "other");
        assert_eq!(ids.internal_id("media-1").as_deref(), Some("other"));
    }

    #[test]
    fn server_id_is_stable_per_url() {
        assert_eq!(
            IdBridge::server_id("http://nas:5666"),
            IdBridge::server_id("http://nas:5666")
        );
        assert_ne!(
            IdBridge::server_id("http://nas:5666"),
            IdBridge::server_id("http://nas:5667")
        );
    }
}
