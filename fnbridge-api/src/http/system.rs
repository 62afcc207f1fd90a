// Branding and visibility stubs

use axum::{extract::State, Json};

use fnbridge_core::models::PublicSystemInfo;
use fnbridge_core::IdBridge;

use super::AppState;

pub async fn ping() -> &'static str {
    ""
}

fn system_info(state: &AppState) -> PublicSystemInfo {
    PublicSystemInfo {
        local_address: format!("http://{}", state.config.listen_address()),
        server_name: state.config.branding.server_name.clone(),
        version: state.config.branding.server_version.clone(),
        product_name: "Jellyfin Server".into(),
        operating_system: std::env::consts::OS.into(),
        id: IdBridge::server_id(&state.config.backend.url),
        startup_wizard_completed: true,
    }
}

pub async fn info_public(State(state): State<AppState>) -> Json<PublicSystemInfo> {
    Json(system_info(&state))
}

pub async fn info(State(state): State<AppState>) -> Json<PublicSystemInfo> {
    Json(system_info(&state))
}
