// The pool<->device and pool<->user relations. Inserts are idempotent by
// construction (ON CONFLICT DO NOTHING); the cascade mutators rely on that.
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::OpError;

pub struct MembershipStore;

impl MembershipStore {
    pub async fn pools_of_device(
        conn: &mut PgConnection,
        device_id: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let rows: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT pool_id FROM pools_devices WHERE device_id = $1")
                .bind(device_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows)
    }

    pub async fn pools_of_user(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let rows: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT pool_id FROM pools_users WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows)
    }

    pub async fn devices_of_pool(
        conn: &mut PgConnection,
        pool_id: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let rows: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT device_id FROM pools_devices WHERE pool_id = $1")
                .bind(pool_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows)
    }

    pub async fn users_of_pool(
        conn: &mut PgConnection,
        pool_id: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let rows: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT user_id FROM pools_users WHERE pool_id = $1")
                .bind(pool_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows)
    }

    /// Returns true when a row was actually inserted.
    pub async fn add_device(
        conn: &mut PgConnection,
        pool_id: Uuid,
        device_id: Uuid,
    ) -> Result<bool, OpError> {
        let result = sqlx::query(
            "INSERT INTO pools_devices (pool_id, device_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(pool_id)
        .bind(device_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns true when a row was actually inserted.
    pub async fn add_user(
        conn: &mut PgConnection,
        pool_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, OpError> {
        let result = sqlx::query(
            "INSERT INTO pools_users (pool_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(pool_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_device(
        conn: &mut PgConnection,
        pool_ids: &[Uuid],
        device_id: Uuid,
    ) -> Result<u64, OpError> {
        if pool_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM pools_devices WHERE pool_id = ANY($1) AND device_id = $2")
                .bind(pool_ids)
                .bind(device_id)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn remove_user(
        conn: &mut PgConnection,
        pool_ids: &[Uuid],
        user_id: Uuid,
    ) -> Result<u64, OpError> {
        if pool_ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("DELETE FROM pools_users WHERE pool_id = ANY($1) AND user_id = $2")
                .bind(pool_ids)
                .bind(user_id)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Clears every membership row under the given pools. Used by the pool
    /// deletion cascade before the pool rows themselves go.
    pub async fn remove_all_for_pools(
        conn: &mut PgConnection,
        pool_ids: &[Uuid],
    ) -> Result<(), OpError> {
        if pool_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM pools_devices WHERE pool_id = ANY($1)")
            .bind(pool_ids)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM pools_users WHERE pool_id = ANY($1)")
            .bind(pool_ids)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Remove a device from every pool of one organisation.
    pub async fn remove_device_from_org_pools(
        conn: &mut PgConnection,
        org_id: Uuid,
        device_id: Uuid,
    ) -> Result<u64, OpError> {
        let result = sqlx::query(
            "DELETE FROM pools_devices WHERE device_id = $1 \
             AND pool_id IN (SELECT id FROM pools WHERE organisation_id = $2)",
        )
        .bind(device_id)
        .bind(org_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Remove a user from every pool of one organisation.
    pub async fn remove_user_from_org_pools(
        conn: &mut PgConnection,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, OpError> {
        let result = sqlx::query(
            "DELETE FROM pools_users WHERE user_id = $1 \
             AND pool_id IN (SELECT id FROM pools WHERE organisation_id = $2)",
        )
        .bind(user_id)
        .bind(org_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// JSON image of one device membership row for audit entries.
    pub async fn device_membership_image(
        conn: &mut PgConnection,
        pool_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<Value>, OpError> {
        let image = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM \
             (SELECT * FROM pools_devices WHERE pool_id = $1 AND device_id = $2) t",
        )
        .bind(pool_id)
        .bind(device_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(image)
    }

    /// JSON image of one user membership row for audit entries.
    pub async fn user_membership_image(
        conn: &mut PgConnection,
        pool_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Value>, OpError> {
        let image = sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM \
             (SELECT * FROM pools_users WHERE pool_id = $1 AND user_id = $2) t",
        )
        .bind(pool_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(image)
    }
}
