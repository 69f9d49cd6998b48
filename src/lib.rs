use std::sync::Arc;

use sqlx::PgPool;

pub mod cache;
pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use cache::AvailabilityCache;
use config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub cache: Arc<AvailabilityCache>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        let cache = Arc::new(AvailabilityCache::new(&config));
        Self {
            db,
            cache,
            config: Arc::new(config),
        }
    }
}
