// Row types shared across stores and handlers
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrganisationRow {
    pub id: Uuid,
    pub name: String,
    pub associated_policy: String,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub phone_no: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PoolRow {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    /// NULL marks the organisation's root pool.
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeviceRow {
    pub id: Uuid,
    pub organisation_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    /// Hub service accounts get full-tree pool visibility on join.
    pub is_hub: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InviteRow {
    pub invite_code: String,
    pub organisation_id: Uuid,
    pub target_email: String,
    pub valid_until: DateTime<Utc>,
}
