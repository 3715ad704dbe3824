use async_trait::async_trait;
use sqlx::PgPool;

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::JobInfo;
use jobcenter_domain::repositories::JobInfoRepository;

/// 任务仓储的PostgreSQL实现
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobInfoRepository for PostgresJobRepository {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobInfo>> {
        let job = sqlx::query_as::<_, JobInfo>("SELECT * FROM job_info WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn find_due(&self, max_next_time: i64, limit: i64) -> JobCenterResult<Vec<JobInfo>> {
        let jobs = sqlx::query_as::<_, JobInfo>(
            r#"
            SELECT * FROM job_info
            WHERE trigger_status = 1 AND trigger_next_time <= $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(max_next_time)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn batch_update_schedule(&self, jobs: &[JobInfo]) -> JobCenterResult<()> {
        // 单事务回写整个扫描窗口，扫描锁仍由调用方持有
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            sqlx::query(
                r#"
                UPDATE job_info
                SET trigger_last_time = $2,
                    trigger_next_time = $3,
                    trigger_status = $4,
                    update_time = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(job.trigger_last_time)
            .bind(job.trigger_next_time)
            .bind(job.trigger_status)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
