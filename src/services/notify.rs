// Push notification seam. Fire-and-forget from the core's perspective:
// handlers log a failure and carry on.
use async_trait::async_trait;

use crate::error::OpError;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, topic: &str, status: &str) -> Result<(), OpError>;
}

/// Stand-in dispatcher that records the notification and succeeds.
#[derive(Debug, Default)]
pub struct LoggedNotifier;

#[async_trait]
impl NotificationDispatcher for LoggedNotifier {
    async fn notify(&self, topic: &str, status: &str) -> Result<(), OpError> {
        tracing::info!(topic, status, "notification dispatched");
        Ok(())
    }
}
