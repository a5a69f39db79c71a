// Authorization checks gating every mutation. All checks run before the
// transaction's mutating statements, so a failure leaves nothing to roll
// back besides reads.
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::DeviceRow;
use crate::error::OpError;

/// Organisation roles, ordered by privilege. Lower number outranks higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionLevel {
    Owner = 1,
    Admin = 2,
    Member = 3,
}

impl PermissionLevel {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(PermissionLevel::Owner),
            2 => Some(PermissionLevel::Admin),
            3 => Some(PermissionLevel::Member),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn is_admin(self) -> bool {
        matches!(self, PermissionLevel::Owner | PermissionLevel::Admin)
    }

    /// Strictly-higher privilege check used for demotion and removal.
    pub fn outranks(self, other: PermissionLevel) -> bool {
        self.as_i16() < other.as_i16()
    }
}

/// Resolved caller identity for one request transaction: the authenticated
/// user plus their (single) organisation membership.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_hub: bool,
    pub org_id: Uuid,
    pub level: PermissionLevel,
}

pub struct AuthorizationGate;

impl AuthorizationGate {
    /// Resolve the authenticated user into an [`Actor`], or `None` when the
    /// user has no organisation membership yet.
    pub async fn resolve_actor(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<Actor>, OpError> {
        let row: Option<(Uuid, bool, Uuid, i16)> = sqlx::query_as(
            "SELECT u.id, u.is_hub, uo.organisation_id, uo.permission_level \
             FROM users u \
             JOIN users_organisations uo ON uo.user_id = u.id \
             WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some((user_id, is_hub, org_id, level)) => {
                let level = PermissionLevel::from_i16(level).ok_or_else(|| {
                    OpError::infrastructure(format!("unknown permission level {}", level))
                })?;
                Ok(Some(Actor {
                    user_id,
                    is_hub,
                    org_id,
                    level,
                }))
            }
            None => Ok(None),
        }
    }

    /// As [`resolve_actor`], but an absent membership is an authorization
    /// failure. This is the path every mutating handler takes.
    pub async fn require_actor(conn: &mut PgConnection, user_id: Uuid) -> Result<Actor, OpError> {
        Self::resolve_actor(conn, user_id)
            .await?
            .ok_or_else(|| OpError::authorization("User does not belong to an organisation"))
    }

    pub fn require_org_admin(actor: &Actor) -> Result<(), OpError> {
        if actor.level.is_admin() {
            Ok(())
        } else {
            Err(OpError::authorization(
                "You must be an organisation admin to perform this action",
            ))
        }
    }

    pub fn require_org_owner(actor: &Actor) -> Result<(), OpError> {
        if actor.level == PermissionLevel::Owner {
            Ok(())
        } else {
            Err(OpError::authorization(
                "You must be the organisation owner to perform this action",
            ))
        }
    }

    /// Permission level of another member of the actor's organisation.
    /// Fails closed when the target is not in that organisation.
    pub async fn member_level(
        conn: &mut PgConnection,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<PermissionLevel, OpError> {
        let level: Option<i16> = sqlx::query_scalar(
            "SELECT permission_level FROM users_organisations \
             WHERE organisation_id = $1 AND user_id = $2",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        let level = level
            .ok_or_else(|| OpError::authorization("User does not belong to your organisation"))?;
        PermissionLevel::from_i16(level)
            .ok_or_else(|| OpError::infrastructure(format!("unknown permission level {}", level)))
    }

    /// Relative check for demotion/removal: the actor must strictly outrank
    /// the target.
    pub fn require_outranks(
        actor: PermissionLevel,
        target: PermissionLevel,
        action: &str,
    ) -> Result<(), OpError> {
        if actor.outranks(target) {
            Ok(())
        } else {
            Err(OpError::InsufficientRank(format!(
                "Cannot {} a user of equal or higher permission status",
                action
            )))
        }
    }

    /// Cross-tenant guard for device targets.
    pub async fn require_device_in_org(
        conn: &mut PgConnection,
        org_id: Uuid,
        device_id: Uuid,
    ) -> Result<DeviceRow, OpError> {
        sqlx::query_as::<_, DeviceRow>(
            "SELECT id, organisation_id, name, created_at FROM devices \
             WHERE id = $1 AND organisation_id = $2",
        )
        .bind(device_id)
        .bind(org_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| OpError::authorization("Device does not belong to your organisation"))
    }

    /// Count of members at admin privilege or above; backs the last-admin
    /// guard on leave/removal.
    pub async fn admin_count(conn: &mut PgConnection, org_id: Uuid) -> Result<i64, OpError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users_organisations \
             WHERE organisation_id = $1 AND permission_level <= 2",
        )
        .bind(org_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count)
    }

    /// Filter the given users down to organisation owners. Used by the pool
    /// creation inheritance rule.
    pub async fn owners_among(
        conn: &mut PgConnection,
        org_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, OpError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM users_organisations \
             WHERE organisation_id = $1 AND permission_level = 1 AND user_id = ANY($2)",
        )
        .bind(org_id)
        .bind(user_ids)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(level: PermissionLevel) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            is_hub: false,
            org_id: Uuid::new_v4(),
            level,
        }
    }

    #[test]
    fn permission_levels_round_trip() {
        for level in [
            PermissionLevel::Owner,
            PermissionLevel::Admin,
            PermissionLevel::Member,
        ] {
            assert_eq!(PermissionLevel::from_i16(level.as_i16()), Some(level));
        }
        assert_eq!(PermissionLevel::from_i16(0), None);
        assert_eq!(PermissionLevel::from_i16(4), None);
    }

    #[test]
    fn admin_gate_admits_owner_and_admin_only() {
        assert!(AuthorizationGate::require_org_admin(&actor(PermissionLevel::Owner)).is_ok());
        assert!(AuthorizationGate::require_org_admin(&actor(PermissionLevel::Admin)).is_ok());
        assert!(AuthorizationGate::require_org_admin(&actor(PermissionLevel::Member)).is_err());
    }

    #[test]
    fn owner_gate_admits_owner_only() {
        assert!(AuthorizationGate::require_org_owner(&actor(PermissionLevel::Owner)).is_ok());
        assert!(AuthorizationGate::require_org_owner(&actor(PermissionLevel::Admin)).is_err());
    }

    #[test]
    fn outranking_is_strict() {
        use PermissionLevel::*;
        assert!(Owner.outranks(Admin));
        assert!(Admin.outranks(Member));
        assert!(!Admin.outranks(Admin));
        assert!(!Member.outranks(Admin));

        let err =
            AuthorizationGate::require_outranks(Admin, Admin, "remove").unwrap_err();
        assert!(matches!(err, OpError::InsufficientRank(_)));
    }
}
