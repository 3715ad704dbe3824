use async_trait::async_trait;
use sqlx::PgPool;

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::JobGroup;
use jobcenter_domain::repositories::JobGroupRepository;

/// 执行器组仓储的PostgreSQL实现
pub struct PostgresJobGroupRepository {
    pool: PgPool,
}

impl PostgresJobGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobGroupRepository for PostgresJobGroupRepository {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobGroup>> {
        let group = sqlx::query_as::<_, JobGroup>("SELECT * FROM job_group WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(group)
    }

    async fn find_by_address_type(&self, address_type: i16) -> JobCenterResult<Vec<JobGroup>> {
        let groups = sqlx::query_as::<_, JobGroup>(
            "SELECT * FROM job_group WHERE address_type = $1 ORDER BY app_name, title, id",
        )
        .bind(address_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn update_address_list(
        &self,
        id: i64,
        address_list: Option<&str>,
    ) -> JobCenterResult<()> {
        sqlx::query("UPDATE job_group SET address_list = $2, update_time = NOW() WHERE id = $1")
            .bind(id)
            .bind(address_list)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
