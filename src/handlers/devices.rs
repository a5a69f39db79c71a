// Device lifecycle operations
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::handlers::{begin_tx, commit_tx, notify_best_effort};
use crate::hierarchy::gate::AuthorizationGate;
use crate::middleware::AuthUser;
use crate::services::DeviceService;
use crate::state::AppState;
use crate::validation::Field;

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub name: Field,
}

#[derive(Debug, Deserialize)]
pub struct RenameDeviceRequest {
    pub device_id: Field,
    pub name: Field,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub device_id: Field,
}

/// POST /api/devices
pub async fn register_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to register device";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let name = body.name.as_string("name").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    let device = DeviceService::register(&mut tx, &actor, &name)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &device.id.to_string(), "device_registered").await;

    Ok(Json(json!({ "success": true, "device_id": device.id })))
}

/// PUT /api/devices/name
pub async fn rename_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<RenameDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to rename device";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let device_id = body.device_id.as_uuid("device_id").map_err(map)?;
    let name = body.name.as_string("name").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    let device = DeviceService::rename(&mut tx, &actor, device_id, &name)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true, "device": device })))
}

/// DELETE /api/devices
pub async fn remove_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<DeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to remove device";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let device_id = body.device_id.as_uuid("device_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    DeviceService::remove(&mut tx, &actor, device_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &device_id.to_string(), "device_removed").await;

    Ok(Json(json!({ "success": true })))
}
