pub mod postgres;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use jobcenter_core::config::DatabaseConfig;
use jobcenter_core::JobCenterResult;

/// 创建数据库连接池
pub async fn create_pool(config: &DatabaseConfig) -> JobCenterResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .connect(&config.url)
        .await?;
    info!("数据库连接池就绪: max_connections={}", config.max_connections);
    Ok(pool)
}
