// Cascading membership mutations. Every method expects to run inside the
// caller's transaction, after the gate checks, and appends its own audit
// entries so a rollback leaves no trace of the attempt.
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::database::models::PoolRow;
use crate::error::OpError;
use crate::hierarchy::audit::{AuditEntry, AuditSink, StatementInfo};
use crate::hierarchy::forest::branch_compatible;
use crate::hierarchy::gate::{Actor, AuthorizationGate};
use crate::hierarchy::membership_store::MembershipStore;
use crate::hierarchy::pool_store::PoolStore;

const POOLS: &str = "pools";
const POOLS_DEVICES: &str = "pools_devices";
const POOLS_USERS: &str = "pools_users";

/// True when inserting one more pool would push the organisation past its
/// cap.
fn pool_quota_reached(existing: i64, max_pools: i64) -> bool {
    existing + 1 > max_pools
}

pub struct HierarchyMutator;

impl HierarchyMutator {
    /// Add a device to a pool, cascading the membership up the ancestor
    /// chain.
    ///
    /// The single-branch invariant is enforced first: the device's current
    /// pool set must be a subset of the target's ancestor chain, otherwise
    /// the device would end up straddling two branches of the tree and the
    /// call fails with a conflict, leaving membership untouched.
    pub async fn add_device_to_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        device_id: Uuid,
        target_pool: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(target_pool) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let current = MembershipStore::pools_of_device(conn, device_id).await?;
        let chain = forest.ancestors_of(target_pool);
        if !branch_compatible(&current, &chain) {
            return Err(OpError::BranchConflict(
                "New pool would be in a different branch than the device's current pools"
                    .to_string(),
            ));
        }

        let mut inserted = Vec::new();
        for pool in &chain {
            if MembershipStore::add_device(conn, *pool, device_id).await? {
                inserted.push(*pool);
            }
        }

        let after = MembershipStore::device_membership_image(conn, target_pool, device_id)
            .await?
            .ok_or_else(|| {
                OpError::infrastructure("device membership missing after cascade insert")
            })?;
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
                    json!({ "device_id": device_id, "pool_ids": inserted }),
                ),
                after,
            ),
        )
        .await?;

        Ok(inserted)
    }

    /// Add a user to a pool, cascading up the ancestor chain.
    ///
    /// Unlike the device path this performs no branch-compatibility check:
    /// users are allowed to span branches.
    pub async fn add_user_to_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        user_id: Uuid,
        target_pool: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(target_pool) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let chain = forest.ancestors_of(target_pool);
        let mut inserted = Vec::new();
        for pool in &chain {
            if MembershipStore::add_user(conn, *pool, user_id).await? {
                inserted.push(*pool);
            }
        }

        let after = MembershipStore::user_membership_image(conn, target_pool, user_id)
            .await?
            .ok_or_else(|| {
                OpError::infrastructure("user membership missing after cascade insert")
            })?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::insert(
                POOLS_USERS,
                user_id,
                StatementInfo::new(
                    "insert",
                    POOLS_USERS,
                    json!({ "user_id": user_id, "pool_ids": inserted }),
                ),
                after,
            ),
        )
        .await?;

        Ok(inserted)
    }

    /// Grant a user membership of every pool in the organisation (full-tree
    /// walk from the root). Admins and hub accounts see everything.
    pub async fn grant_all_pools(
        conn: &mut PgConnection,
        org_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Uuid>, OpError> {
        let forest = PoolStore::load_forest(conn, org_id).await?;
        let root = forest
            .root()
            .ok_or_else(|| OpError::infrastructure("organisation has no root pool"))?;

        let mut inserted = Vec::new();
        for pool in forest.all_from_root() {
            if MembershipStore::add_user(conn, pool, user_id).await? {
                inserted.push(pool);
            }
        }

        let after = MembershipStore::user_membership_image(conn, root, user_id)
            .await?
            .ok_or_else(|| {
                OpError::infrastructure("root membership missing after full-tree grant")
            })?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                POOLS_USERS,
                user_id,
                StatementInfo::new(
                    "insert",
                    POOLS_USERS,
                    json!({ "user_id": user_id, "pool_ids": inserted, "scope": "all" }),
                ),
                after,
            ),
        )
        .await?;

        Ok(inserted)
    }

    /// Add a user to the organisation's default (root) pool only.
    pub async fn add_user_to_root_pool(
        conn: &mut PgConnection,
        org_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> Result<Uuid, OpError> {
        let forest = PoolStore::load_forest(conn, org_id).await?;
        let root = forest
            .root()
            .ok_or_else(|| OpError::infrastructure("organisation has no root pool"))?;

        MembershipStore::add_user(conn, root, user_id).await?;

        let after = MembershipStore::user_membership_image(conn, root, user_id)
            .await?
            .ok_or_else(|| OpError::infrastructure("root membership missing after insert"))?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                POOLS_USERS,
                user_id,
                StatementInfo::new(
                    "insert",
                    POOLS_USERS,
                    json!({ "user_id": user_id, "pool_ids": [root] }),
                ),
                after,
            ),
        )
        .await?;

        Ok(root)
    }

    /// Create a pool under an existing parent, enforcing the organisation
    /// quota, then inherit memberships from the parent: organisation owners
    /// always follow, and when the parent is itself non-root, so does every
    /// member of the parent pool.
    pub async fn create_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        name: &str,
        parent_id: Uuid,
        max_pools: i64,
    ) -> Result<PoolRow, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(parent_id) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let count = PoolStore::count_in_org(conn, actor.org_id).await?;
        if pool_quota_reached(count, max_pools) {
            return Err(OpError::QuotaExceeded(format!(
                "You have reached your organisation's group limit of {}",
                max_pools
            )));
        }

        let row = PoolStore::insert(conn, actor.org_id, name, Some(parent_id)).await?;
        let after = PoolStore::row_image(conn, row.id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::insert(
                POOLS,
                row.id,
                StatementInfo::new(
                    "insert",
                    POOLS,
                    json!({ "name": name, "parent_id": parent_id }),
                ),
                after,
            ),
        )
        .await?;

        let parent_users = MembershipStore::users_of_pool(conn, parent_id).await?;
        let inherited = if forest.is_root(parent_id) {
            AuthorizationGate::owners_among(conn, actor.org_id, &parent_users).await?
        } else {
            parent_users
        };
        let mut added = Vec::new();
        for user in &inherited {
            if MembershipStore::add_user(conn, row.id, *user).await? {
                added.push(*user);
            }
        }
        if !added.is_empty() {
            AuditSink::record(
                conn,
                actor.org_id,
                actor.user_id,
                AuditEntry::insert(
                    POOLS_USERS,
                    row.id,
                    StatementInfo::new(
                        "insert",
                        POOLS_USERS,
                        json!({ "pool_id": row.id, "user_ids": added }),
                    ),
                    json!({ "pool_id": row.id, "user_ids": added }),
                ),
            )
            .await?;
        }

        Ok(row)
    }

    /// Create an organisation's root pool. Runs once, during organisation
    /// creation, before any forest exists.
    pub async fn create_root_pool(
        conn: &mut PgConnection,
        org_id: Uuid,
        actor_id: Uuid,
        name: &str,
    ) -> Result<PoolRow, OpError> {
        let row = PoolStore::insert(conn, org_id, name, None).await?;
        let after = PoolStore::row_image(conn, row.id).await?;
        AuditSink::record(
            conn,
            org_id,
            actor_id,
            AuditEntry::insert(
                POOLS,
                row.id,
                StatementInfo::new("insert", POOLS, json!({ "name": name, "parent_id": null })),
                after,
            ),
        )
        .await?;
        Ok(row)
    }

    /// Rename a pool, auditing before/after images of the row.
    pub async fn rename_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        pool_id: Uuid,
        name: &str,
    ) -> Result<PoolRow, OpError> {
        PoolStore::fetch_in_org(conn, actor.org_id, pool_id).await?;
        let before = PoolStore::row_image(conn, pool_id).await?;
        let row = PoolStore::rename(conn, actor.org_id, pool_id, name).await?;
        let after = PoolStore::row_image(conn, pool_id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::update(
                POOLS,
                pool_id,
                StatementInfo::new("update", POOLS, json!({ "name": name })),
                before,
                after,
            ),
        )
        .await?;
        Ok(row)
    }

    /// Delete a pool and everything beneath it. The organisation's root pool
    /// is never deleted, even when it sits inside the requested closure, so
    /// deleting the root prunes the tree down to just the default pool.
    pub async fn delete_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        pool_id: Uuid,
    ) -> Result<u64, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(pool_id) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let doomed = forest.deletable_descendants(pool_id);
        if doomed.is_empty() {
            // Root with no children: nothing below it to remove.
            return Ok(0);
        }

        let before = PoolStore::row_image(conn, pool_id).await?;
        MembershipStore::remove_all_for_pools(conn, &doomed).await?;
        let removed = PoolStore::delete_many(conn, actor.org_id, &doomed).await?;

        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::delete(
                POOLS,
                pool_id,
                StatementInfo::new("delete", POOLS, json!({ "pool_ids": doomed })),
                before,
            ),
        )
        .await?;

        Ok(removed)
    }

    /// Remove a device from a pool and every descendant of it. Membership in
    /// an ancestor implies reachability into the subtree, so removal strips
    /// the entire subtree's claim.
    pub async fn remove_device_from_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        device_id: Uuid,
        pool_id: Uuid,
    ) -> Result<u64, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(pool_id) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let subtree = forest.descendants_of(pool_id);
        let before = MembershipStore::device_membership_image(conn, pool_id, device_id).await?;
        let Some(before) = before else {
            // Device was not in this pool; nothing to cascade.
            return Ok(0);
        };

        let removed = MembershipStore::remove_device(conn, &subtree, device_id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::delete(
                POOLS_DEVICES,
                device_id,
                StatementInfo::new(
                    "delete",
                    POOLS_DEVICES,
                    json!({ "device_id": device_id, "pool_ids": subtree }),
                ),
                before,
            ),
        )
        .await?;

        Ok(removed)
    }

    /// Remove a user from a pool and every descendant of it.
    pub async fn remove_user_from_pool(
        conn: &mut PgConnection,
        actor: &Actor,
        user_id: Uuid,
        pool_id: Uuid,
    ) -> Result<u64, OpError> {
        let forest = PoolStore::load_forest(conn, actor.org_id).await?;
        if !forest.contains(pool_id) {
            return Err(OpError::authorization(
                "Pool does not belong to your organisation",
            ));
        }

        let subtree = forest.descendants_of(pool_id);
        let before = MembershipStore::user_membership_image(conn, pool_id, user_id).await?;
        let Some(before) = before else {
            return Ok(0);
        };

        let removed = MembershipStore::remove_user(conn, &subtree, user_id).await?;
        AuditSink::record(
            conn,
            actor.org_id,
            actor.user_id,
            AuditEntry::delete(
                POOLS_USERS,
                user_id,
                StatementInfo::new(
                    "delete",
                    POOLS_USERS,
                    json!({ "user_id": user_id, "pool_ids": subtree }),
                ),
                before,
            ),
        )
        .await?;

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_admits_exactly_the_cap() {
        assert!(!pool_quota_reached(0, 100));
        // the 100th pool is allowed
        assert!(!pool_quota_reached(99, 100));
        // the 101st is not
        assert!(pool_quota_reached(100, 100));
        assert!(pool_quota_reached(150, 100));
    }
}
