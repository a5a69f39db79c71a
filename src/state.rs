use std::sync::Arc;

use sqlx::PgPool;

use crate::services::{AccessPolicyService, NotificationDispatcher};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub policy: Arc<dyn AccessPolicyService>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        policy: Arc<dyn AccessPolicyService>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            pool,
            policy,
            notifier,
        }
    }
}
