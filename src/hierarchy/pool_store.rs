// Pool persistence: loading the per-organisation forest and the row-level
// statements the mutators build on. Every method runs on the caller's
// transaction connection.
use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::PoolRow;
use crate::error::OpError;
use crate::hierarchy::forest::PoolForest;

const POOL_COLUMNS: &str = "id, organisation_id, name, parent_id, created_at";

pub struct PoolStore;

impl PoolStore {
    /// Load the organisation's parent links into a traversable forest.
    pub async fn load_forest(
        conn: &mut PgConnection,
        org_id: Uuid,
    ) -> Result<PoolForest, OpError> {
        let links: Vec<(Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, parent_id FROM pools WHERE organisation_id = $1")
                .bind(org_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(PoolForest::from_links(links))
    }

    pub async fn pools_of_org(
        conn: &mut PgConnection,
        org_id: Uuid,
    ) -> Result<Vec<PoolRow>, OpError> {
        let sql = format!(
            "SELECT {} FROM pools WHERE organisation_id = $1 ORDER BY created_at",
            POOL_COLUMNS
        );
        let rows = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(org_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// Fetch a pool, failing closed when it does not belong to the claimed
    /// organisation.
    pub async fn fetch_in_org(
        conn: &mut PgConnection,
        org_id: Uuid,
        pool_id: Uuid,
    ) -> Result<PoolRow, OpError> {
        let sql = format!(
            "SELECT {} FROM pools WHERE id = $1 AND organisation_id = $2",
            POOL_COLUMNS
        );
        sqlx::query_as::<_, PoolRow>(&sql)
            .bind(pool_id)
            .bind(org_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| OpError::authorization("Pool does not belong to your organisation"))
    }

    pub async fn count_in_org(conn: &mut PgConnection, org_id: Uuid) -> Result<i64, OpError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT id) FROM pools WHERE organisation_id = $1")
                .bind(org_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }

    pub async fn insert(
        conn: &mut PgConnection,
        org_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<PoolRow, OpError> {
        let sql = format!(
            "INSERT INTO pools (id, organisation_id, name, parent_id) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            POOL_COLUMNS
        );
        let row = sqlx::query_as::<_, PoolRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(org_id)
            .bind(name)
            .bind(parent_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn rename(
        conn: &mut PgConnection,
        org_id: Uuid,
        pool_id: Uuid,
        name: &str,
    ) -> Result<PoolRow, OpError> {
        let sql = format!(
            "UPDATE pools SET name = $1 WHERE id = $2 AND organisation_id = $3 RETURNING {}",
            POOL_COLUMNS
        );
        sqlx::query_as::<_, PoolRow>(&sql)
            .bind(name)
            .bind(pool_id)
            .bind(org_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| OpError::authorization("Pool does not belong to your organisation"))
    }

    /// Delete the given pools. The id list is produced by the mutator from a
    /// descendant walk and never includes the root pool.
    pub async fn delete_many(
        conn: &mut PgConnection,
        org_id: Uuid,
        pool_ids: &[Uuid],
    ) -> Result<u64, OpError> {
        if pool_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM pools \
             WHERE organisation_id = $1 AND id = ANY($2) AND parent_id IS NOT NULL",
        )
        .bind(org_id)
        .bind(pool_ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// JSON image of a pool row for audit entries. Absence is fatal for the
    /// enclosing transaction: an image the sink cannot capture means an
    /// incomplete trail.
    pub async fn row_image(conn: &mut PgConnection, pool_id: Uuid) -> Result<Value, OpError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT row_to_json(t) FROM (SELECT * FROM pools WHERE id = $1) t",
        )
        .bind(pool_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| OpError::infrastructure(format!("pool {} missing for audit image", pool_id)))
    }
}
