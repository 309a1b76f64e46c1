use std::sync::Arc;

use axum::extract::FromRef;

pub mod clock;
pub mod commands;
pub mod config;
pub mod controllers;
pub mod db;
pub mod html;
pub mod keys;
pub mod models;
pub mod types;

mod error;
pub use error::{ApiError, ApiResult};

use clock::{Clock, SystemClock};
use config::Config;
use db::Database;

/// Everything a request handler or command needs, cheap to clone.
#[derive(Clone, FromRef)]
pub struct App {
    pub config: Arc<Config>,
    pub database: Database,
    pub clock: Arc<dyn Clock>,
}

impl App {
    /// Connect to the configured database and make sure the schema exists.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let database =
            Database::connect(&config.database.url, config.database.max_connections).await?;
        database.migrate().await?;
        Ok(App {
            config: Arc::new(config),
            database,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        App {
            clock: Arc::new(clock),
            ..self
        }
    }
}
