// Member role management within an organisation
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, OpError};
use crate::handlers::{begin_tx, commit_tx};
use crate::hierarchy::gate::{AuthorizationGate, PermissionLevel};
use crate::hierarchy::mutator::HierarchyMutator;
use crate::middleware::AuthUser;
use crate::services::OrgService;
use crate::state::AppState;
use crate::validation::Field;

#[derive(Debug, Deserialize)]
pub struct TargetUserRequest {
    pub user_id: Field,
}

/// POST /api/users/promote
///
/// Grants the target every pool in the organisation before raising their
/// level, so an admin's visibility is complete the moment the role lands.
pub async fn promote_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<TargetUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to promote user";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let target = body.user_id.as_uuid("user_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    AuthorizationGate::member_level(&mut tx, actor.org_id, target)
        .await
        .map_err(map)?;

    HierarchyMutator::grant_all_pools(&mut tx, actor.org_id, actor.user_id, target)
        .await
        .map_err(map)?;
    OrgService::update_member_level(
        &mut tx,
        actor.user_id,
        actor.org_id,
        target,
        PermissionLevel::Admin,
    )
    .await
    .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /api/users/demote
pub async fn demote_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<TargetUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to demote user";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let target = body.user_id.as_uuid("user_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    let target_level = AuthorizationGate::member_level(&mut tx, actor.org_id, target)
        .await
        .map_err(map)?;
    AuthorizationGate::require_outranks(actor.level, target_level, "demote").map_err(map)?;

    OrgService::update_member_level(
        &mut tx,
        actor.user_id,
        actor.org_id,
        target,
        PermissionLevel::Member,
    )
    .await
    .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/users
pub async fn remove_user_from_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<TargetUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to remove user from organisation";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let target = body.user_id.as_uuid("user_id").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;
    let target_level = AuthorizationGate::member_level(&mut tx, actor.org_id, target)
        .await
        .map_err(map)?;
    AuthorizationGate::require_outranks(actor.level, target_level, "remove").map_err(map)?;

    let org = OrgService::fetch_organisation(&mut tx, actor.org_id)
        .await
        .map_err(map)?;
    OrgService::remove_member_everywhere(&mut tx, actor.user_id, actor.org_id, target)
        .await
        .map_err(map)?;
    state
        .policy
        .detach(&org.associated_policy, target)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true })))
}

/// GET /api/users/me
///
/// 204 when the caller exists but has no organisation membership yet.
pub async fn user_details(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    const FALLBACK: &str = "Unable to fetch user details";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let mut conn = state
        .pool
        .acquire()
        .await
        .map_err(|err| ApiError::from_op(OpError::from(err), FALLBACK))?;

    let user = OrgService::fetch_user(&mut conn, auth.user_id)
        .await
        .map_err(map)?
        .ok_or_else(|| ApiError::unauthorized("Unknown user identity"))?;

    let Some(actor) = AuthorizationGate::resolve_actor(&mut conn, auth.user_id)
        .await
        .map_err(map)?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let org = OrgService::fetch_organisation(&mut conn, actor.org_id)
        .await
        .map_err(map)?;

    let body = Json(json!({
        "success": true,
        "user": user,
        "organisation_id": org.id,
        "organisation_name": org.name,
        "permission_level": actor.level.as_i16(),
    }));
    Ok((StatusCode::OK, body).into_response())
}
