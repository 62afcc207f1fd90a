//! Client session store.
//!
//! Maps the access token handed to a Jellyfin client onto the fnOS
//! credentials behind it. Sessions optionally persist to a JSON file so a
//! restart does not log every client out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSession {
    pub backend_token: String,
    pub backend_url: String,
    pub user_id: String,
    pub username: String,
    pub client: String,
    pub device_id: String,
    pub device_name: String,
    pub app_version: String,
    pub created_at: i64,
    pub last_activity: i64,
}

/// Identity a client presents at login, before any token exists.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub client: String,
    pub device_id: String,
    pub device_name: String,
    pub app_version: String,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, ClientSession>,
    persist_path: Option<PathBuf>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl SessionStore {
    #[must_use]
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        let store = Self {
            sessions: DashMap::new(),
            persist_path,
        };
        if let Some(loaded) = store.load() {
            for (token, session) in loaded {
                store.sessions.insert(token, session);
            }
            info!(count = store.sessions.len(), "restored client sessions");
        }
        store
    }

    /// Create a session and return its access token.
    pub fn create(
        &self,
        backend_token: String,
        backend_url: String,
        user_id: String,
        username: String,
        device: DeviceInfo,
    ) -> String {
        // Jellyfin tokens are dashless hex.
        let access_token = Uuid::new_v4().simple().to_string();
        let now = now_millis();
        self.sessions.insert(
            access_token.clone(),
            ClientSession {
                backend_token,
                backend_url,
                user_id,
                username,
                client: device.client,
                device_id: device.device_id,
                device_name: device.device_name,
                app_version: device.app_version,
                created_at: now,
                last_activity: now,
            },
        );
        self.save();
        access_token
    }

    /// Look up a session, refreshing its activity timestamp.
    #[must_use]
    pub fn get(&self, access_token: &str) -> Option<ClientSession> {
        let mut entry = self.sessions.get_mut(access_token)?;
        entry.last_activity = now_millis();
        Some(entry.value().clone())
    }

    pub fn remove(&self, access_token: &str) -> bool {
        let removed = self.sessions.remove(access_token).is_some();
        if removed {
            self.save();
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn load(&self) -> Option<HashMap<String, ClientSession>> {
        let path = self.persist_path.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn save(&self) {
        let Some(path) = self.persist_path.as_ref() else {
            return;
        };
        let mut data = HashMap::new();
        for entry in self.sessions.iter() {
            data.insert(entry.key().clone(), entry.value().clone());
        }
        match serde_json::to_string_pretty(&data) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "failed to persist sessions");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize sessions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            client: "Jellyfin Web".into(),
            device_id: "dev-1".into(),
            device_name: "Firefox".into(),
            app_version: "10.12.0".into(),
        }
    }

    #[test]
    fn create_then_get_roundtrip() {
        let store = SessionStore::new(None);
        let token = store.create(
            "fnos-token".into(),
            "http://nas:5666".into(),
            "user-1".into(),
            "alice".into(),
            device(),
        );
        assert_eq!(token.len(), 32);
        assert!(!token.contains('-'));

        let session = store.get(&token).unwrap();
        assert_eq!(session.backend_token, "fnos-token");
        assert_eq!(session.username, "alice");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn remove_drops_session() {
        let store = SessionStore::new(None);
        let token = store.create(
            "t".into(),
            "http://nas".into(),
            "u".into(),
            "n".into(),
            device(),
        );
        assert_eq!(store.len(), 1);
        assert!(store.remove(&token));
        assert!(!store.remove(&token));
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_survive_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::new(Some(path.clone()));
        let token = store.create(
            "fnos-token".into(),
            "http://nas:5666".into(),
            "user-1".into(),
            "alice".into(),
            device(),
        );
        drop(store);

        let reloaded = SessionStore::new(Some(path));
        let session = reloaded.get(&token).unwrap();
        assert_eq!(session.username, "alice");
    }
}
