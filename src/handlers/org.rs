// Organisation lifecycle operations
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::config;
use crate::error::{ApiError, OpError};
use crate::handlers::{begin_tx, commit_tx, notify_best_effort};
use crate::hierarchy::gate::{AuthorizationGate, PermissionLevel};
use crate::hierarchy::membership_store::MembershipStore;
use crate::hierarchy::mutator::HierarchyMutator;
use crate::hierarchy::pool_store::PoolStore;
use crate::middleware::AuthUser;
use crate::services::{DeviceService, OrgService};
use crate::services::org_service::OrgAddress;
use crate::state::AppState;
use crate::validation::Field;

#[derive(Debug, Deserialize)]
pub struct CreateOrganisationRequest {
    pub name: Field,
    pub address_line_1: Option<Field>,
    pub address_line_2: Option<Field>,
    pub city: Option<Field>,
    pub county: Option<Field>,
    pub postcode: Option<Field>,
    pub phone_no: Option<Field>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAddressRequest {
    pub address_line_1: Option<Field>,
    pub address_line_2: Option<Field>,
    pub city: Option<Field>,
    pub county: Option<Field>,
    pub postcode: Option<Field>,
    pub phone_no: Option<Field>,
}

#[derive(Debug, Deserialize)]
pub struct JoinOrganisationRequest {
    pub invite_code: Field,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub target_email: Field,
}

fn optional_string(field: &Option<Field>, name: &str) -> Result<Option<String>, OpError> {
    field.as_ref().map(|f| f.as_string(name)).transpose()
}

fn address_from(
    line_1: &Option<Field>,
    line_2: &Option<Field>,
    city: &Option<Field>,
    county: &Option<Field>,
    postcode: &Option<Field>,
    phone_no: &Option<Field>,
) -> Result<OrgAddress, OpError> {
    Ok(OrgAddress {
        address_line_1: optional_string(line_1, "address_line_1")?,
        address_line_2: optional_string(line_2, "address_line_2")?,
        city: optional_string(city, "city")?,
        county: optional_string(county, "county")?,
        postcode: optional_string(postcode, "postcode")?,
        phone_no: optional_string(phone_no, "phone_no")?,
    })
}

/// POST /api/org
///
/// One transaction creates the organisation, its root pool, the creator's
/// owner membership and root-pool membership, and attaches the access policy.
pub async fn create_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateOrganisationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to create organisation";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let name = body.name.as_string("name").map_err(map)?;
    let address = address_from(
        &body.address_line_1,
        &body.address_line_2,
        &body.city,
        &body.county,
        &body.postcode,
        &body.phone_no,
    )
    .map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let user = OrgService::fetch_user(&mut tx, auth.user_id)
        .await
        .map_err(map)?
        .ok_or_else(|| ApiError::unauthorized("Unknown user identity"))?;
    if OrgService::user_has_organisation(&mut tx, user.id)
        .await
        .map_err(map)?
    {
        return Err(ApiError::forbidden("You already belong to an organisation"));
    }

    let org = OrgService::insert_organisation(&mut tx, user.id, &name, &address)
        .await
        .map_err(map)?;
    let root = HierarchyMutator::create_root_pool(&mut tx, org.id, user.id, &name)
        .await
        .map_err(map)?;
    OrgService::insert_member(&mut tx, user.id, org.id, user.id, PermissionLevel::Owner)
        .await
        .map_err(map)?;
    HierarchyMutator::add_user_to_root_pool(&mut tx, org.id, user.id, user.id)
        .await
        .map_err(map)?;

    state
        .policy
        .attach(&org.associated_policy, user.id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;
    notify_best_effort(&state, &root.id.to_string(), "organisation_created").await;

    Ok(Json(json!({
        "success": true,
        "organisation_id": org.id,
        "root_pool_id": root.id,
    })))
}

/// POST /api/org/join
///
/// Plain users join at member level into the root pool; hub service accounts
/// join at admin level with full-tree pool visibility.
pub async fn join_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<JoinOrganisationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to join organisation";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let code = body.invite_code.as_string("invite_code").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let user = OrgService::fetch_user(&mut tx, auth.user_id)
        .await
        .map_err(map)?
        .ok_or_else(|| ApiError::unauthorized("Unknown user identity"))?;
    if OrgService::user_has_organisation(&mut tx, user.id)
        .await
        .map_err(map)?
    {
        return Err(ApiError::forbidden("You already belong to an organisation"));
    }

    let invite = OrgService::resolve_invite(&mut tx, &code).await.map_err(map)?;
    if !invite.target_email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::forbidden(
            "Invite was issued to a different email address",
        ));
    }

    let level = if user.is_hub {
        PermissionLevel::Admin
    } else {
        PermissionLevel::Member
    };
    OrgService::insert_member(&mut tx, user.id, invite.organisation_id, user.id, level)
        .await
        .map_err(map)?;
    if user.is_hub {
        HierarchyMutator::grant_all_pools(&mut tx, invite.organisation_id, user.id, user.id)
            .await
            .map_err(map)?;
    } else {
        HierarchyMutator::add_user_to_root_pool(&mut tx, invite.organisation_id, user.id, user.id)
            .await
            .map_err(map)?;
    }
    OrgService::delete_invite(&mut tx, &code).await.map_err(map)?;

    let org = OrgService::fetch_organisation(&mut tx, invite.organisation_id)
        .await
        .map_err(map)?;
    state
        .policy
        .attach(&org.associated_policy, user.id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({
        "success": true,
        "organisation_id": org.id,
    })))
}

/// DELETE /api/org
///
/// Owner-only. Everything the organisation owns goes with it in one
/// transaction; the access policy is detached from every member before
/// commit so a broker failure aborts the whole delete.
pub async fn delete_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to delete organisation";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_owner(&actor).map_err(map)?;

    let members = OrgService::members_of_org(&mut tx, actor.org_id)
        .await
        .map_err(map)?;
    let org = OrgService::delete_organisation(&mut tx, actor.user_id, actor.org_id)
        .await
        .map_err(map)?;
    for member in &members {
        state
            .policy
            .detach(&org.associated_policy, member.id)
            .await
            .map_err(map)?;
    }

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /api/org/leave
pub async fn leave_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to leave organisation";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    if actor.level.is_admin() {
        let admins = AuthorizationGate::admin_count(&mut tx, actor.org_id)
            .await
            .map_err(map)?;
        if admins <= 1 {
            return Err(map(OpError::LastAdminStanding(
                "You are the only admin of your organisation; promote another member before leaving"
                    .to_string(),
            )));
        }
    }

    let org = OrgService::fetch_organisation(&mut tx, actor.org_id)
        .await
        .map_err(map)?;
    OrgService::remove_member_everywhere(&mut tx, actor.user_id, actor.org_id, actor.user_id)
        .await
        .map_err(map)?;
    state
        .policy
        .detach(&org.associated_policy, actor.user_id)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /api/org/invite
pub async fn invite_to_organisation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to create invite";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let email = body.target_email.as_email("target_email").map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_admin(&actor).map_err(map)?;

    // The invitee may not exist yet, but one who does must be unaffiliated.
    if let Some(existing) = OrgService::fetch_user_by_email(&mut tx, &email)
        .await
        .map_err(map)?
    {
        if OrgService::user_has_organisation(&mut tx, existing.id)
            .await
            .map_err(map)?
        {
            return Err(ApiError::forbidden(
                "User already belongs to an organisation",
            ));
        }
    }

    let invite = OrgService::create_invite(
        &mut tx,
        actor.user_id,
        actor.org_id,
        &email,
        config::config().hierarchy.invite_valid_hours,
    )
    .await
    .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({
        "success": true,
        "invite_code": invite.invite_code,
        "valid_until": invite.valid_until,
    })))
}

/// PUT /api/org/address
pub async fn update_organisation_address(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<UpdateAddressRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const FALLBACK: &str = "Unable to update organisation address";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let address = address_from(
        &body.address_line_1,
        &body.address_line_2,
        &body.city,
        &body.county,
        &body.postcode,
        &body.phone_no,
    )
    .map_err(map)?;

    let mut tx = begin_tx(&state.pool, FALLBACK).await?;

    let actor = AuthorizationGate::require_actor(&mut tx, auth.user_id)
        .await
        .map_err(map)?;
    AuthorizationGate::require_org_owner(&actor).map_err(map)?;

    let org = OrgService::update_address(&mut tx, actor.user_id, actor.org_id, &address)
        .await
        .map_err(map)?;

    commit_tx(tx, FALLBACK).await?;

    Ok(Json(json!({ "success": true, "organisation": org })))
}

/// GET /api/org/overview
///
/// 204 when the caller has no organisation to report on.
pub async fn organisation_overview(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    const FALLBACK: &str = "Unable to fetch organisation overview";
    let map = |err| ApiError::from_op(err, FALLBACK);

    let mut conn = state
        .pool
        .acquire()
        .await
        .map_err(|err| ApiError::from_op(OpError::from(err), FALLBACK))?;

    let Some(actor) = AuthorizationGate::resolve_actor(&mut conn, auth.user_id)
        .await
        .map_err(map)?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let org = OrgService::fetch_organisation(&mut conn, actor.org_id)
        .await
        .map_err(map)?;
    let pools = PoolStore::pools_of_org(&mut conn, actor.org_id)
        .await
        .map_err(map)?;
    let devices = DeviceService::devices_of_org(&mut conn, actor.org_id)
        .await
        .map_err(map)?;
    let members = OrgService::members_of_org(&mut conn, actor.org_id)
        .await
        .map_err(map)?;

    // Members only see the pools they belong to; admins and hubs see all.
    let pools = if actor.level.is_admin() || actor.is_hub {
        pools
    } else {
        let mine = MembershipStore::pools_of_user(&mut conn, actor.user_id)
            .await
            .map_err(map)?;
        pools.into_iter().filter(|p| mine.contains(&p.id)).collect()
    };

    let mut pool_entries = Vec::with_capacity(pools.len());
    for pool in &pools {
        let pool_devices = MembershipStore::devices_of_pool(&mut conn, pool.id)
            .await
            .map_err(map)?;
        pool_entries.push(json!({
            "id": pool.id,
            "name": pool.name,
            "parent_id": pool.parent_id,
            "devices": pool_devices,
        }));
    }

    let body = Json(json!({
        "success": true,
        "organisation": org,
        "pools": pool_entries,
        "devices": devices,
        "members": members,
    }));
    Ok((StatusCode::OK, body).into_response())
}
