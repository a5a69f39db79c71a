// Organisation lifecycle: creation, membership, invites, profile reads.
// Like the hierarchy mutators, every method runs on the caller's transaction
// and appends its own audit entries.
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::models::{InviteRow, OrganisationRow, UserRow};
use crate::error::OpError;
use crate::hierarchy::audit::{AuditEntry, AuditSink, StatementInfo};
use crate::hierarchy::gate::PermissionLevel;
use crate::hierarchy::membership_store::MembershipStore;

const ORGANISATIONS: &str = "organisations";
const USERS_ORGANISATIONS: &str = "users_organisations";
const ORGANISATION_INVITES: &str = "organisation_invites";

const ORG_COLUMNS: &str = "id, name, associated_policy, address_line_1, address_line_2, \
                           city, county, postcode, phone_no, created_at";

/// Postal address fields for an organisation.
#[derive(Debug, Clone)]
pub struct OrgAddress {
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub phone_no: Option<String>,
}

#[derive(Debug, FromRow, serde::Serialize)]
pub struct MemberOverviewRow {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub permission_level: i16,
}

pub struct OrgService;

impl OrgService {
    pub async fn fetch_user(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<UserRow>, OpError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, is_hub, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn fetch_user_by_email(
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<Option<UserRow>, OpError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, is_hub, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn fetch_organisation(
        conn: &mut PgConnection,
        org_id: Uuid,
    ) -> Result<OrganisationRow, OpError> {
        let sql = format!("SELECT {} FROM organisations WHERE id = $1", ORG_COLUMNS);
        sqlx::query_as::<_, OrganisationRow>(&sql)
            .bind(org_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| OpError::infrastructure(format!("organisation {} missing", org_id)))
    }

    pub async fn user_has_organisation(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<bool, OpError> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM users_organisations WHERE user_id = $1 LIMIT 1")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(exists.is_some())
    }

    /// Insert the organisation row. The associated access-policy name is
    /// derived from the new id and never changes afterwards.
    pub async fn insert_organisation(
        conn: &mut PgConnection,
        actor_id: Uuid,
        name: &str,
        address: &OrgAddress,
    ) -> Result<OrganisationRow, OpError> {
        let org_id = Uuid::new_v4();
        let policy_name = format!("hivegrid-org-{}", org_id);
        let sql = format!(
            "INSERT INTO organisations \
             (id, name, associated_policy, address_line_1, address_line_2, city, county, postcode, phone_no) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            ORG_COLUMNS
        );
        let row = sqlx::query_as::<_, OrganisationRow>(&sql)
            .bind(org_id)
            .bind(name)
            .bind(&policy_name)
            .bind(&address.address_line_1)
            .bind(&address.address_line_2)
            .bind(&address.city)
            .bind(&address.county)
            .bind(&address.postcode)
            .bind(&address.phone_no)
            .fetch_one(&mut *conn)
            .await?;

        let after = Self::organisation_image(conn, org_id).await?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                ORGANISATIONS,
                org_id,
                StatementInfo::new("insert", ORGANISATIONS, json!({ "name": name })),
                after,
            ),
        )
        .await?;

        Ok(row)
    }

    /// Update the organisation's address fields, auditing before/after
    /// images of the row.
    pub async fn update_address(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        address: &OrgAddress,
    ) -> Result<OrganisationRow, OpError> {
        let before = Self::organisation_image(conn, org_id).await?;

        let sql = format!(
            "UPDATE organisations SET address_line_1 = $1, address_line_2 = $2, city = $3, \
             county = $4, postcode = $5, phone_no = $6 WHERE id = $7 RETURNING {}",
            ORG_COLUMNS
        );
        let row = sqlx::query_as::<_, OrganisationRow>(&sql)
            .bind(&address.address_line_1)
            .bind(&address.address_line_2)
            .bind(&address.city)
            .bind(&address.county)
            .bind(&address.postcode)
            .bind(&address.phone_no)
            .bind(org_id)
            .fetch_one(&mut *conn)
            .await?;

        let after = Self::organisation_image(conn, org_id).await?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::update(
                ORGANISATIONS,
                org_id,
                StatementInfo::new("update", ORGANISATIONS, json!({ "fields": "address" })),
                before,
                after,
            ),
        )
        .await?;

        Ok(row)
    }

    /// Delete the organisation and everything it owns: pool memberships,
    /// pools (root included), invites, devices and member rows, then the
    /// organisation itself. One audit entry on the organisation row covers
    /// the cascade; the entry is written before the row goes so the image
    /// capture cannot miss.
    pub async fn delete_organisation(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
    ) -> Result<OrganisationRow, OpError> {
        let org = Self::fetch_organisation(conn, org_id).await?;
        let before = Self::organisation_image(conn, org_id).await?;

        sqlx::query(
            "DELETE FROM pools_devices \
             WHERE pool_id IN (SELECT id FROM pools WHERE organisation_id = $1)",
        )
        .bind(org_id)
        .execute(&mut *conn)
        .await?;
        sqlx::query(
            "DELETE FROM pools_users \
             WHERE pool_id IN (SELECT id FROM pools WHERE organisation_id = $1)",
        )
        .bind(org_id)
        .execute(&mut *conn)
        .await?;
        sqlx::query("DELETE FROM pools WHERE organisation_id = $1")
            .bind(org_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM organisation_invites WHERE organisation_id = $1")
            .bind(org_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM devices WHERE organisation_id = $1")
            .bind(org_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM users_organisations WHERE organisation_id = $1")
            .bind(org_id)
            .execute(&mut *conn)
            .await?;

        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::delete(
                ORGANISATIONS,
                org_id,
                StatementInfo::new("delete", ORGANISATIONS, json!({ "cascade": true })),
                before,
            ),
        )
        .await?;

        sqlx::query("DELETE FROM organisations WHERE id = $1")
            .bind(org_id)
            .execute(&mut *conn)
            .await?;

        Ok(org)
    }

    /// Add a user to the organisation at the given permission level.
    pub async fn insert_member(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        user_id: Uuid,
        level: PermissionLevel,
    ) -> Result<(), OpError> {
        sqlx::query(
            "INSERT INTO users_organisations (user_id, organisation_id, permission_level) \
             VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(org_id)
        .bind(level.as_i16())
        .execute(&mut *conn)
        .await?;

        let after = Self::membership_image(conn, org_id, user_id)
            .await?
            .ok_or_else(|| OpError::infrastructure("membership missing after insert"))?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                USERS_ORGANISATIONS,
                user_id,
                StatementInfo::new(
                    "insert",
                    USERS_ORGANISATIONS,
                    json!({ "user_id": user_id, "permission_level": level.as_i16() }),
                ),
                after,
            ),
        )
        .await?;

        Ok(())
    }

    /// Change a member's permission level, auditing before/after images.
    pub async fn update_member_level(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        user_id: Uuid,
        level: PermissionLevel,
    ) -> Result<(), OpError> {
        let before = Self::membership_image(conn, org_id, user_id)
            .await?
            .ok_or_else(|| OpError::authorization("User does not belong to your organisation"))?;

        sqlx::query(
            "UPDATE users_organisations SET permission_level = $1 \
             WHERE organisation_id = $2 AND user_id = $3",
        )
        .bind(level.as_i16())
        .bind(org_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        let after = Self::membership_image(conn, org_id, user_id)
            .await?
            .ok_or_else(|| OpError::infrastructure("membership missing after update"))?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::update(
                USERS_ORGANISATIONS,
                user_id,
                StatementInfo::new(
                    "update",
                    USERS_ORGANISATIONS,
                    json!({ "user_id": user_id, "permission_level": level.as_i16() }),
                ),
                before,
                after,
            ),
        )
        .await?;

        Ok(())
    }

    /// Remove a member's organisation row, auditing the before image.
    /// Pool membership cleanup is a separate statement with its own entry.
    pub async fn remove_member(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), OpError> {
        let before = Self::membership_image(conn, org_id, user_id)
            .await?
            .ok_or_else(|| OpError::authorization("User does not belong to your organisation"))?;

        sqlx::query("DELETE FROM users_organisations WHERE organisation_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::delete(
                USERS_ORGANISATIONS,
                user_id,
                StatementInfo::new(
                    "delete",
                    USERS_ORGANISATIONS,
                    json!({ "user_id": user_id }),
                ),
                before,
            ),
        )
        .await?;

        Ok(())
    }

    /// Strip a user's pool memberships across the organisation, then remove
    /// their organisation membership. Two statements, two audit entries.
    pub async fn remove_member_everywhere(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), OpError> {
        let pools = MembershipStore::pools_of_user(conn, user_id).await?;
        let removed =
            MembershipStore::remove_user_from_org_pools(conn, org_id, user_id).await?;
        if removed > 0 {
            AuditSink::record(
                conn,
                org_id,
                actor_id,
                AuditEntry::delete(
                    "pools_users",
                    user_id,
                    StatementInfo::new(
                        "delete",
                        "pools_users",
                        json!({ "user_id": user_id, "scope": "organisation" }),
                    ),
                    json!({ "user_id": user_id, "pool_ids": pools }),
                ),
            )
            .await?;
        }

        Self::remove_member(conn, actor_id, org_id, user_id).await
    }

    /// Create (or replace) the pending invite for an email address.
    pub async fn create_invite(
        conn: &mut PgConnection,
        actor_id: Uuid,
        org_id: Uuid,
        target_email: &str,
        valid_hours: i64,
    ) -> Result<InviteRow, OpError> {
        sqlx::query(
            "DELETE FROM organisation_invites WHERE organisation_id = $1 AND target_email = $2",
        )
        .bind(org_id)
        .bind(target_email)
        .execute(&mut *conn)
        .await?;

        let code = generate_invite_code();
        let valid_until = Utc::now() + Duration::hours(valid_hours);
        let row = sqlx::query_as::<_, InviteRow>(
            "INSERT INTO organisation_invites (invite_code, organisation_id, target_email, valid_until) \
             VALUES ($1, $2, $3, $4) \
             RETURNING invite_code, organisation_id, target_email, valid_until",
        )
        .bind(&code)
        .bind(org_id)
        .bind(target_email)
        .bind(valid_until)
        .fetch_one(&mut *conn)
        .await?;

        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                ORGANISATION_INVITES,
                org_id,
                StatementInfo::new(
                    "insert",
                    ORGANISATION_INVITES,
                    json!({ "target_email": target_email }),
                ),
                json!({ "invite_code": code, "valid_until": valid_until }),
            ),
        )
        .await?;

        Ok(row)
    }

    /// Look up a redeemable invite. Unknown and expired codes are
    /// indistinguishable to the caller.
    pub async fn resolve_invite(
        conn: &mut PgConnection,
        code: &str,
    ) -> Result<InviteRow, OpError> {
        sqlx::query_as::<_, InviteRow>(
            "SELECT invite_code, organisation_id, target_email, valid_until \
             FROM organisation_invites WHERE invite_code = $1 AND valid_until > now()",
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| OpError::authorization("Invalid or expired invite code"))
    }

    pub async fn delete_invite(conn: &mut PgConnection, code: &str) -> Result<(), OpError> {
        sqlx::query("DELETE FROM organisation_invites WHERE invite_code = $1")
            .bind(code)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn members_of_org(
        conn: &mut PgConnection,
        org_id: Uuid,
    ) -> Result<Vec<MemberOverviewRow>, OpError> {
        let rows = sqlx::query_as::<_, MemberOverviewRow>(
            "SELECT u.id, u.email, u.display_name, uo.permission_level \
             FROM users u JOIN users_organisations uo ON uo.user_id = u.id \
             WHERE uo.organisation_id = $1 ORDER BY uo.permission_level, u.email",
        )
        .bind(org_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    async fn organisation_image(conn: &mut PgConnection, org_id: Uuid) -> Result<Value, OpError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM (SELECT * FROM organisations WHERE id = $1) t",
        )
        .bind(org_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            OpError::infrastructure(format!("organisation {} missing for audit image", org_id))
        })
    }

    async fn membership_image(
        conn: &mut PgConnection,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Value>, OpError> {
        let image = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM (SELECT * FROM users_organisations \
             WHERE organisation_id = $1 AND user_id = $2) t",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(image)
    }
}

/// Short shareable invite code. Uniqueness is enforced by the table; the
/// replace-on-reinvite flow keeps collisions harmless.
fn generate_invite_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_are_short_and_uppercase() {
        let code = generate_invite_code();
        assert_eq!(code.len(), 8);
        assert_eq!(code, code.to_uppercase());
    }

    #[test]
    fn invite_codes_vary() {
        assert_ne!(generate_invite_code(), generate_invite_code());
    }
}
