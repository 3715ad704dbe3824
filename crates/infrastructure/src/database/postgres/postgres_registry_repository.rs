use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::RegistryEntry;
use jobcenter_domain::repositories::JobRegistryRepository;

/// 执行器注册表仓储的PostgreSQL实现
pub struct PostgresRegistryRepository {
    pool: PgPool,
}

impl PostgresRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRegistryRepository for PostgresRegistryRepository {
    async fn upsert(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_registry (registry_group, registry_key, registry_value, update_time)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (registry_group, registry_key, registry_value)
            DO UPDATE SET update_time = NOW()
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()> {
        sqlx::query(
            r#"
            DELETE FROM job_registry
            WHERE registry_group = $1 AND registry_key = $2 AND registry_value = $3
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_dead_ids(&self, timeout_seconds: i64) -> JobCenterResult<Vec<i64>> {
        let deadline = Utc::now() - Duration::seconds(timeout_seconds);
        let ids =
            sqlx::query_scalar::<_, i64>("SELECT id FROM job_registry WHERE update_time < $1")
                .bind(deadline)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn remove_by_ids(&self, ids: &[i64]) -> JobCenterResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM job_registry WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_alive(&self, timeout_seconds: i64) -> JobCenterResult<Vec<RegistryEntry>> {
        let deadline = Utc::now() - Duration::seconds(timeout_seconds);
        let entries = sqlx::query_as::<_, RegistryEntry>(
            "SELECT * FROM job_registry WHERE update_time >= $1 ORDER BY registry_value",
        )
        .bind(deadline)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
