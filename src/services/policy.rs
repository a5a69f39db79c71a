// Seam for the external message-broker ACL system. Attach/detach calls run
// synchronously inside the request, before commit, so a downstream failure
// aborts the whole transaction.
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::OpError;

#[async_trait]
pub trait AccessPolicyService: Send + Sync {
    /// Attach the named access policy to a principal.
    async fn attach(&self, policy: &str, principal: Uuid) -> Result<(), OpError>;

    /// Detach the named access policy from a principal.
    async fn detach(&self, policy: &str, principal: Uuid) -> Result<(), OpError>;
}

/// Stand-in implementation that records the call and succeeds. The real ACL
/// backend is wired in at deployment.
#[derive(Debug, Default)]
pub struct LoggedPolicyService;

#[async_trait]
impl AccessPolicyService for LoggedPolicyService {
    async fn attach(&self, policy: &str, principal: Uuid) -> Result<(), OpError> {
        tracing::info!(policy, %principal, "attach access policy");
        Ok(())
    }

    async fn detach(&self, policy: &str, principal: Uuid) -> Result<(), OpError> {
        tracing::info!(policy, %principal, "detach access policy");
        Ok(())
    }
}
