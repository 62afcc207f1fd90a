// Login: Jellyfin's AuthenticateByName mapped onto the fnOS login flow

use axum::{
    extract::{Request, State},
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use fnbridge_core::models::{AuthenticationResult, SessionInfo, UserDto};
use fnbridge_core::session::DeviceInfo;
use fnbridge_core::IdBridge;

use super::middleware::parse_auth_header;
use super::{AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
struct AuthenticateRequest {
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "Pw", default)]
    pw: String,
}

pub async fn authenticate_by_name(
    State(state): State<AppState>,
    req: Request,
) -> AppResult<Json<AuthenticationResult>> {
    let auth_value = req
        .headers()
        .get("Authorization")
        .or_else(|| req.headers().get("X-Emby-Authorization"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let identity = parse_auth_header(&auth_value).unwrap_or_default();

    let bytes = axum::body::to_bytes(req.into_body(), 64 * 1024)
        .await
        .map_err(|_| AppError::bad_request("Failed to read body"))?;
    let body: AuthenticateRequest =
        serde_json::from_slice(&bytes).map_err(|_| AppError::bad_request("Invalid request body"))?;

    if body.username.is_empty() || body.pw.is_empty() {
        return Err(AppError::bad_request("Username and password are required"));
    }

    // The login endpoint may relocate the account to another node; sessions
    // stick to the address the backend reported.
    let (backend_token, moved_to) = state
        .login_client()?
        .login(&body.username, &body.pw)
        .await
        .map_err(|e| {
            warn!(user = %body.username, error = %e, "login failed");
            AppError::unauthorized("Invalid username or password")
        })?;
    let backend_url = moved_to.unwrap_or_else(|| state.config.backend.url.clone());

    let server_id = IdBridge::server_id(&state.config.backend.url);
    let user_id = state.ids.external_id(&format!("user_{}", body.username));

    let device = DeviceInfo {
        client: identity.client.clone(),
        device_id: identity.device_id.clone(),
        device_name: identity.device.clone(),
        app_version: identity.version.clone(),
    };
    let access_token = state.sessions.create(
        backend_token.clone(),
        backend_url.clone(),
        user_id.clone(),
        body.username.clone(),
        device,
    );

    info!(
        user = %body.username,
        client = %identity.client,
        device = %identity.device,
        "login succeeded"
    );

    // display name from the backend profile when reachable
    let display_name = match state
        .backend_client(&backend_url, &backend_token)?
        .user_info()
        .await
    {
        Ok(profile) if !profile.nickname.is_empty() => profile.nickname,
        Ok(profile) if !profile.username.is_empty() => profile.username,
        _ => body.username.clone(),
    };

    let user = UserDto {
        id: user_id.clone(),
        name: display_name,
        server_id: server_id.clone(),
        has_password: true,
        has_configured_password: true,
        enable_auto_login: false,
    };

    let session_info = SessionInfo {
        id: access_token.chars().take(8).collect(),
        user_id,
        user_name: body.username,
        client: identity.client,
        device_id: identity.device_id,
        device_name: identity.device,
        application_version: identity.version,
    };

    Ok(Json(AuthenticationResult {
        user,
        session_info,
        access_token,
        server_id,
    }))
}
