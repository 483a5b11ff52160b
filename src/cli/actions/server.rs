use crate::api;
use crate::api::handlers::auth::state::{AuthState, Backend};
use crate::auth::audit::{AuditSink, TracingAuditSink};
use crate::auth::identity::{load_roster, Directory, MemoryDirectory};
use crate::auth::store::{AttemptStore, MemoryStore, PgAuditSink, PgStore, SessionStore};
use crate::auth::SessionManager;
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        roster,
        config,
    } = action;

    let state = match dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(5))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;

            let store = Arc::new(PgStore::new(pool.clone()));
            let audit = Arc::new(PgAuditSink::new(pool.clone()));
            let manager = SessionManager::new(
                &config,
                Arc::clone(&store) as Arc<dyn SessionStore>,
                Arc::clone(&store) as Arc<dyn AttemptStore>,
                store as Arc<dyn Directory>,
                audit as Arc<dyn AuditSink>,
            )?;
            AuthState::new(Arc::new(manager), Backend::Postgres(pool), config)
        }
        None => {
            warn!("No DSN provided, sessions and lockouts will not survive a restart");

            let directory = match &roster {
                Some(path) => {
                    let entries = load_roster(path)?;
                    Arc::new(MemoryDirectory::from_roster(entries)?)
                }
                None => {
                    warn!("No roster provided, the in-memory directory starts empty");
                    Arc::new(MemoryDirectory::new())
                }
            };
            let store = Arc::new(MemoryStore::new());
            let audit = Arc::new(TracingAuditSink);
            let manager = SessionManager::new(
                &config,
                Arc::clone(&store) as Arc<dyn SessionStore>,
                store as Arc<dyn AttemptStore>,
                directory as Arc<dyn Directory>,
                audit as Arc<dyn AuditSink>,
            )?;
            AuthState::new(Arc::new(manager), Backend::Memory, config)
        }
    };

    api::new(port, Arc::new(state)).await
}
