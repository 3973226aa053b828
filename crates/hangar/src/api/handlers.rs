//! HTTP handlers.

use axum::{
    Json,
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use hangar_protocol::payloads::GatewayStats;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Upgrade to the multiplexed gateway socket.
///
/// Identity is established in-band with an `auth` message, so the upgrade
/// itself is unauthenticated.
pub async fn gateway_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.gateway.ensure_accepting()?;

    let max_size = state.gateway.config().max_message_size;
    let gateway = state.gateway.clone();
    Ok(ws
        .max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| async move {
            match gateway.handle_connection(socket) {
                Ok(client) => debug!(client_id = %client.id(), "Gateway socket attached"),
                Err(e) => warn!("Rejected gateway socket: {}", e),
            }
        }))
}

/// Connected clients and subscription counts per channel.
pub async fn gateway_stats(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.gateway.stats())
}
