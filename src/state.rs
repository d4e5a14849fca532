use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// Memoizes bearer-token -> tenant-user-id resolution so every request
    /// does not pay for JWT decoding.
    pub auth_cache: Cache<String, String>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        let auth_cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.auth_cache_ttl_seconds))
            .max_capacity(config.auth_cache_max_entries)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            auth_cache,
        })
    }
}
