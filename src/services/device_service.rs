// Device lifecycle within an organisation. Registration drops the device
// into the root pool so it is reachable before anyone files it further down
// the tree.
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::DeviceRow;
use crate::error::OpError;
use crate::hierarchy::audit::{AuditEntry, AuditSink, StatementInfo};
use crate::hierarchy::gate::{Actor, AuthorizationGate};
use crate::hierarchy::membership_store::MembershipStore;
use crate::hierarchy::pool_store::PoolStore;

const DEVICES: &str = "devices";
const POOLS_DEVICES: &str = "pools_devices";

pub struct DeviceService;

impl DeviceService {
    pub async fn devices_of_org(
        conn: &mut PgConnection,
        org_id: Uuid,
    ) -> Result<Vec<DeviceRow>, OpError> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, organisation_id, name, created_at FROM devices \
             WHERE organisation_id = $1 ORDER BY name",
        )
        .bind(org_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Register a new device and place it in the organisation's root pool.
    pub async fn register(
        conn: &mut PgConnection,
        actor: &Actor,
        name: &str,
    ) -> Result<DeviceRow, OpError> {
        let device_id = Uuid::new_v4();
        let row = sqlx::query_as::<_, DeviceRow>(
            "INSERT INTO devices (id, organisation_id, name) VALUES ($1, $2, $3) \
             RETURNING id, organisation_id, name, created_at",
        )
        .bind(device_id)
        .bind(actor.org_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

        let after = Self::device_image(conn, device_id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::insert(
                DEVICES,
                device_id,
                StatementInfo::new("insert", DEVICES, json!({ "name": name })),
                after,
            ),
        )
        .await?;

        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        let root = forest
            .root()
            .ok_or_else(|| OpError::infrastructure("organisation has no root pool"))?;
        MembershipStore::add_device(conn, root, device_id).await?;

        let membership = MembershipStore::device_membership_image(conn, root, device_id)
            .await?
            .ok_or_else(|| OpError::infrastructure("root membership missing after registration"))?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::insert(
                POOLS_DEVICES,
                device_id,
                StatementInfo::new(
                    "insert",
                    POOLS_DEVICES,
                    json!({ "device_id": device_id, "pool_ids": [root] }),
                ),
                membership,
            ),
        )
        .await?;

        Ok(row)
    }

    /// Rename a device, auditing before/after images of the row.
    pub async fn rename(
        conn: &mut PgConnection,
        actor: &Actor,
        device_id: Uuid,
        name: &str,
    ) -> Result<DeviceRow, OpError> {
        AuthorizationGate::require_device_in_org(conn, actor.org_id, device_id).await?;
        let before = Self::device_image(conn, device_id).await?;

        let row = sqlx::query_as::<_, DeviceRow>(
            "UPDATE devices SET name = $1 WHERE id = $2 AND organisation_id = $3 \
             RETURNING id, organisation_id, name, created_at",
        )
        .bind(name)
        .bind(device_id)
        .bind(actor.org_id)
        .fetch_one(&mut *conn)
        .await?;

        let after = Self::device_image(conn, device_id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::update(
                DEVICES,
                device_id,
                StatementInfo::new("update", DEVICES, json!({ "name": name })),
                before,
                after,
            ),
        )
        .await?;

        Ok(row)
    }

    /// Remove a device from the organisation entirely: strip every pool
    /// membership, then delete the row.
    pub async fn remove(
        conn: &mut PgConnection,
        actor: &Actor,
        device_id: Uuid,
    ) -> Result<(), OpError> {
        AuthorizationGate::require_device_in_org(conn, actor.org_id, device_id).await?;
        let before = Self::device_image(conn, device_id).await?;

        MembershipStore::remove_device_from_org_pools(conn, actor.org_id, device_id).await?;
        sqlx::query("DELETE FROM devices WHERE id = $1 AND organisation_id = $2")
            .bind(device_id)
            .bind(actor.org_id)
            .execute(&mut *conn)
            .await?;

        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::delete(
                DEVICES,
                device_id,
                StatementInfo::new("delete", DEVICES, json!({ "device_id": device_id })),
                before,
            ),
        )
        .await?;

        Ok(())
    }

    async fn device_image(conn: &mut PgConnection, device_id: Uuid) -> Result<Value, OpError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM (SELECT * FROM devices WHERE id = $1) t",
        )
        .bind(device_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            OpError::infrastructure(format!("device {} missing for audit image", device_id))
        })
    }
}
