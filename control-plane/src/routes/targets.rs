//! `GET/PUT /api/v1/target[/{name}]`, `POST .../register_device`,
//! `DELETE .../device/{id}` (`spec.md` §4.6; the single-target GET and the
//! device DELETE are supplemented per `SPEC_FULL.md` §2.6/§6 item 2).

use std::net::Ipv4Addr;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rvpn_protocol::jsonrpc::{Request, RequestIdGenerator};
use rvpn_protocol::methods::{DeleteVpnPeersParams, WirePeer, DELETE_VPN_PEERS};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{Target, WIREGUARD_PEER_CIDR};
use crate::{db, AppState};

pub async fn list_targets(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<Vec<Target>>, ApiError> {
    let targets = db::list_targets_for_principal(&state.pool, &principal).await?;
    Ok(Json(targets))
}

/// `GET /api/v1/target/{name}` response: the persisted row plus the §3
/// computed `alive` flag (serve metadata present AND a live serving
/// session in the Connection Manager).
#[derive(Debug, Serialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: Target,
    pub alive: bool,
}

pub async fn get_target(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<Json<TargetDetail>, ApiError> {
    let target = db::get_target(&state.pool, &name).await?.ok_or(ApiError::NotFound)?;
    if !db::is_authorized(&state.pool, &target, &principal).await? {
        return Err(ApiError::Forbidden);
    }
    let alive = target.has_serve_metadata() && state.connections.is_alive(&name);
    Ok(Json(TargetDetail { target, alive }))
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    /// First address of the target's network prefix; defaults to
    /// `10.8.0.0` per `spec.md` §4.6 when omitted.
    #[serde(default = "default_network_ip")]
    pub network_ip: Ipv4Addr,
}

fn default_network_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 8, 0, 0)
}

pub async fn create_target(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(name): Path<String>,
    Json(body): Json<CreateTargetRequest>,
) -> Result<Json<Target>, ApiError> {
    db::create_target(&state.pool, &name, &principal, body.network_ip)
        .await?
        .map(Json)
        .ok_or(ApiError::Conflict)
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub hardware_id: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub device_id: Uuid,
    pub device_token: String,
}

pub async fn register_device(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(name): Path<String>,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<Json<RegisterDeviceResponse>, ApiError> {
    let target = db::get_target(&state.pool, &name).await?.ok_or(ApiError::NotFound)?;
    if !db::is_authorized(&state.pool, &target, &principal).await? {
        return Err(ApiError::Forbidden);
    }

    let device = db::get_or_create_device(&state.pool, &principal, &body.hardware_id).await?;
    let device_token = crate::auth::sign_device_token(&state.jwt_secret, device.device_id, chrono::Duration::days(365))?;
    Ok(Json(RegisterDeviceResponse {
        device_id: device.device_id,
        device_token,
    }))
}

pub async fn delete_device(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path((name, device_id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = db::get_target(&state.pool, &name).await?.ok_or(ApiError::NotFound)?;
    if !db::is_authorized(&state.pool, &target, &principal).await? {
        return Err(ApiError::Forbidden);
    }

    let connection = db::delete_connection(&state.pool, &name, device_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.connections.remove_client_session(&name, device_id);
    state.connections.remove_serving_session(&name, device_id);

    if let Some(serving) = state.connections.serving_session(&name) {
        let peer = WirePeer {
            public_key: connection.pubkey.clone(),
            allowed_ip: connection.client_addr(),
            allowed_cidr: WIREGUARD_PEER_CIDR,
        };
        let ids = RequestIdGenerator::default();
        let request = Request::new(ids.next(), DELETE_VPN_PEERS, DeleteVpnPeersParams { peers: vec![peer] });
        if serving.call(request).await.is_none() {
            tracing::warn!(target = %name, "failed to push peer removal to serving session");
        }
    }

    Ok(Json(serde_json::json!({ "success": true })))
}
