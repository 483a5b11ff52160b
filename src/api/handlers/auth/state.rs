//! Shared state for the auth endpoints.

use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::{AuthConfig, SessionManager};

/// Which storage backend the server was started with. `/health` reports it
/// and probes Postgres when present.
#[derive(Clone)]
pub enum Backend {
    Memory,
    Postgres(PgPool),
}

pub struct AuthState {
    manager: Arc<SessionManager>,
    backend: Backend,
    config: AuthConfig,
}

impl AuthState {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, backend: Backend, config: AuthConfig) -> Self {
        Self {
            manager,
            backend,
            config,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}
