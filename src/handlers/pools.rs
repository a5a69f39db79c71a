// Pool tree operations: creation, deletion, rename, and the membership
// cascades that keep the tree's invariants.
use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::config;
use crate::error::ApiError;
use crate::handlers::{begin_tx, commit_tx, notify_best_effort};
use crate::hierarchy::gate::AuthorizationGate;
use crate::hierarchy::mutator::HierarchyMutator;
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::validation::Field;

#[derive(Debug, Deserialize)]
pub struct CreatePoolRequest {
    pub name: Field,
    pub parent_id: Field,
}

#[derive(Debug, Deserialize)]
pub struct PoolRequest {
    pub pool_id: Field,
}

#[derive(Debug, Deserialize)]
pub struct RenamePoolRequest {
    pub pool_id: Field,
    pub name: Field,
}

#[derive(Debug, Deserialize)]
pub struct PoolDeviceRequest {
    pub pool_id: Field,
    pub device_id: Field,
}

#[derive(Debug, Deserialize)]
pub struct PoolUserRequest {
    pub pool_id: Field,
    pub user_id: Field,
}

/// POST /api/pools
///
/// The new pool's id doubles as its messaging topic, so it is the one thing
/// the client needs back.
pub async fn create_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreatePoolRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to create pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let name = body.name.as_string("name").map_err(map)?;
    let parent_id = body.parent_id.as_uuid("parent_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    let pool = HierarchyMutator::create_pool(
        &mut tx,
        &actor,
        &name,
        parent_id,
        config::config().hierarchy.max_pools_per_org,
    )
    .await
    .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &pool.id.to_string(), "pool_created").await;

    Ok(Json(json!({ "success": true, "pool_id": pool.id })))
}

/// DELETE /api/pools
pub async fn delete_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PoolRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to delete pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    let removed = HierarchyMutator::delete_pool(&mut tx, &actor, pool_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &pool_id.to_string(), "pool_deleted").await;

    Ok(Json(json!({ "success": true, "pools_removed": removed })))
}

/// PUT /api/pools/name
pub async fn rename_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<RenamePoolRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to rename pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;
    let name = body.name.as_string("name").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    let pool = HierarchyMutator::rename_pool(&mut tx, &actor, pool_id, &name)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true, "pool": pool })))
}

/// POST /api/pools/devices
pub async fn add_device_to_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PoolDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to add device to pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;
    let device_id = body.device_id.as_uuid("device_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    AuthorizationGate::require_device_in_org(&mut tx, actor.org_id, device_id)
        .await
        .map_err(map)?;

    let added = HierarchyMutator::add_device_to_pool(&mut tx, &actor, device_id, pool_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &device_id.to_string(), "device_pools_changed").await;

    Ok(Json(json!({ "success": true, "pools_added": added })))
}

/// DELETE /api/pools/devices
pub async fn remove_device_from_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PoolDeviceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to remove device from pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;
    let device_id = body.device_id.as_uuid("device_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    AuthorizationGate::require_device_in_org(&mut tx, actor.org_id, device_id)
        .await
        .map_err(map)?;

    let removed = HierarchyMutator::remove_device_from_pool(&mut tx, &actor, device_id, pool_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &device_id.to_string(), "device_pools_changed").await;

    Ok(Json(json!({ "success": true, "memberships_removed": removed })))
}

/// POST /api/pools/users
pub async fn add_user_to_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PoolUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to add user to pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;
    let user_id = body.user_id.as_uuid("user_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    AuthorizationGate::member_level(&mut tx, actor.org_id, user_id)
        .await
        .map_err(map)?;

    let added = HierarchyMutator::add_user_to_pool(&mut tx, &actor, user_id, pool_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true, "pools_added": added })))
}

/// DELETE /api/pools/users
pub async fn remove_user_from_pool(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<PoolUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to remove user from pool";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let pool_id = body.pool_id.as_uuid("pool_id").map_err(map)?;
    let user_id = body.user_id.as_uuid("user_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    let target_level = AuthorizationGate::member_level(&mut tx, actor.org_id, user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_outranks(actor.level, target_level, "remove").map_err(map)?;

    let removed = HierarchyMutator::remove_user_from_pool(&mut tx, &actor, user_id, pool_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true, "memberships_removed": removed })))
}
