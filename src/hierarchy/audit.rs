// Append-only audit trail, written on the same transaction as the mutation
// it describes. Entries are never updated or deleted.
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::OpError;

/// Operation kinds recorded in the audit log. The numeric codes are part of
/// the stored data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    Update = 1,
    Delete = 2,
    Insert = 3,
}

impl AuditOp {
    pub fn code(self) -> i16 {
        self as i16
    }
}

/// Structured description of the statement behind an entry: operation name,
/// table, and bound parameters as JSON. Replaces replaying literal SQL text
/// into the log.
#[derive(Debug, Clone, Serialize)]
pub struct StatementInfo {
    pub operation: &'static str,
    pub table: &'static str,
    pub params: Value,
}

impl StatementInfo {
    pub fn new(operation: &'static str, table: &'static str, params: Value) -> Self {
        Self {
            operation,
            table,
            params,
        }
    }
}

/// One immutable audit record. `before` is `{}` for inserts and `after` is
/// `{}` for deletes.
#[derive(Debug)]
pub struct AuditEntry {
    pub table: &'static str,
    pub op: AuditOp,
    pub record_id: Uuid,
    pub statement: StatementInfo,
    pub before: Value,
    pub after: Value,
}

impl AuditEntry {
    pub fn insert(
        table: &'static str,
        record_id: Uuid,
        statement: StatementInfo,
        after: Value,
    ) -> Self {
        Self {
            table,
            op: AuditOp::Insert,
            record_id,
            statement,
            before: json!({}),
            after,
        }
    }

    pub fn update(
        table: &'static str,
        record_id: Uuid,
        statement: StatementInfo,
        before: Value,
        after: Value,
    ) -> Self {
        Self {
            table,
            op: AuditOp::Update,
            record_id,
            statement,
            before,
            after,
        }
    }

    pub fn delete(
        table: &'static str,
        record_id: Uuid,
        statement: StatementInfo,
        before: Value,
    ) -> Self {
        Self {
            table,
            op: AuditOp::Delete,
            record_id,
            statement,
            before,
            after: json!({}),
        }
    }
}

pub struct AuditSink;

impl AuditSink {
    /// Append one entry. Serialization or insert failures are fatal for the
    /// enclosing transaction; the operation rolls back rather than commit an
    /// incomplete trail.
    pub async fn record(
        conn: &mut PgConnection,
        org_id: Uuid,
        actor_id: Uuid,
        entry: AuditEntry,
    ) -> Result<(), OpError> {
        let statement = serde_json::to_value(&entry.statement)
            .map_err(|e| OpError::infrastructure(format!("audit statement encoding: {}", e)))?;

        sqlx::query(
            "INSERT INTO audit_log \
             (table_name, operation, record_id, statement, before_image, after_image, \
              organisation_id, actor_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(entry.table)
        .bind(entry.op.code())
        .bind(entry.record_id)
        .bind(statement)
        .bind(entry.before)
        .bind(entry.after)
        .bind(org_id)
        .bind(actor_id)
        .execute(&mut *conn)
        .await?;

        tracing::debug!(
            table = entry.table,
            operation = entry.op.code(),
            record = %entry.record_id,
            "audit entry recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_codes_are_stable() {
        assert_eq!(AuditOp::Update.code(), 1);
        assert_eq!(AuditOp::Delete.code(), 2);
        assert_eq!(AuditOp::Insert.code(), 3);
    }

    #[test]
    fn insert_entries_have_empty_before_image() {
        let entry = AuditEntry::insert(
            "pools",
            Uuid::new_v4(),
            StatementInfo::new("insert", "pools", json!({"name": "floor"})),
            json!({"name": "floor"}),
        );
        assert_eq!(entry.before, json!({}));
        assert_eq!(entry.op, AuditOp::Insert);
    }

    #[test]
    fn delete_entries_have_empty_after_image() {
        let entry = AuditEntry::delete(
            "pools",
            Uuid::new_v4(),
            StatementInfo::new("delete", "pools", json!({})),
            json!({"name": "floor"}),
        );
        assert_eq!(entry.after, json!({}));
        assert_eq!(entry.op, AuditOp::Delete);
    }

    #[test]
    fn statement_serialises_structured() {
        let info = StatementInfo::new("insert", "pools_devices", json!({"pool_id": "x"}));
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["operation"], "insert");
        assert_eq!(v["table"], "pools_devices");
        assert_eq!(v["params"]["pool_id"], "x");
    }
}
