pub mod server;

use crate::auth::AuthConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub enum Action {
    Server {
        port: u16,
        dsn: Option<String>,
        roster: Option<PathBuf>,
        config: AuthConfig,
    },
}
