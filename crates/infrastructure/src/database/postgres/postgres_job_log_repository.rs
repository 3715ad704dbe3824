use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use jobcenter_core::constants::DEAD_TIMEOUT_SECONDS;
use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::JobLog;
use jobcenter_domain::repositories::JobLogRepository;

/// 调度日志仓储的PostgreSQL实现
pub struct PostgresJobLogRepository {
    pool: PgPool,
}

impl PostgresJobLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLogRepository for PostgresJobLogRepository {
    async fn create(&self, log: &JobLog) -> JobCenterResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO job_log
                (job_group, job_id, executor_fail_retry_count,
                 trigger_time, trigger_code, handle_code, alarm_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(log.job_group)
        .bind(log.job_id)
        .bind(log.executor_fail_retry_count)
        .bind(log.trigger_time)
        .bind(log.trigger_code)
        .bind(log.handle_code)
        .bind(log.alarm_status)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn load(&self, id: i64) -> JobCenterResult<Option<JobLog>> {
        let log = sqlx::query_as::<_, JobLog>("SELECT * FROM job_log WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(log)
    }

    async fn update_trigger_info(&self, log: &JobLog) -> JobCenterResult<()> {
        sqlx::query(
            r#"
            UPDATE job_log
            SET executor_address = $2,
                executor_handler = $3,
                executor_param = $4,
                executor_sharding_param = $5,
                executor_fail_retry_count = $6,
                trigger_code = $7,
                trigger_msg = $8
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(&log.executor_address)
        .bind(&log.executor_handler)
        .bind(&log.executor_param)
        .bind(&log.executor_sharding_param)
        .bind(log.executor_fail_retry_count)
        .bind(log.trigger_code)
        .bind(&log.trigger_msg)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_handle_info(&self, log: &JobLog) -> JobCenterResult<()> {
        sqlx::query(
            r#"
            UPDATE job_log
            SET handle_time = $2, handle_code = $3, handle_msg = $4
            WHERE id = $1
            "#,
        )
        .bind(log.id)
        .bind(log.handle_time)
        .bind(log.handle_code)
        .bind(&log.handle_msg)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_lost_ids(&self, before: DateTime<Utc>) -> JobCenterResult<Vec<i64>> {
        // 执行器地址与存活注册表左联，联不上的才算失联
        let alive_deadline = Utc::now() - Duration::seconds(DEAD_TIMEOUT_SECONDS);
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT l.id
            FROM job_log l
            LEFT JOIN job_registry r
                ON l.executor_address = r.registry_value AND r.update_time >= $2
            WHERE l.trigger_code = 200
              AND l.handle_code = 0
              AND l.trigger_time <= $1
              AND l.executor_address IS NOT NULL
              AND r.id IS NULL
            "#,
        )
        .bind(before)
        .bind(alive_deadline)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_fail_ids(&self, limit: i64) -> JobCenterResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM job_log
            WHERE (trigger_code NOT IN (0, 200) OR handle_code = 500)
              AND alarm_status = 0
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn update_alarm_status(
        &self,
        id: i64,
        expected: i16,
        new_status: i16,
    ) -> JobCenterResult<bool> {
        let result =
            sqlx::query("UPDATE job_log SET alarm_status = $3 WHERE id = $1 AND alarm_status = $2")
                .bind(id)
                .bind(expected)
                .bind(new_status)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clean_before(&self, before: DateTime<Utc>) -> JobCenterResult<u64> {
        let result = sqlx::query("DELETE FROM job_log WHERE trigger_time < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
