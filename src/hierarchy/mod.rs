// Pool hierarchy management: the tree model, its stores, the cascade
// mutators, the authorization gate and the audit sink.
pub mod audit;
pub mod forest;
pub mod gate;
pub mod membership_store;
pub mod mutator;
pub mod pool_store;

pub use audit::{AuditEntry, AuditOp, AuditSink, StatementInfo};
pub use forest::{branch_compatible, PoolForest};
pub use gate::{Actor, AuthorizationGate, PermissionLevel};
pub use membership_store::MembershipStore;
pub use mutator::HierarchyMutator;
pub use pool_store::PoolStore;
