use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use jobcenter_core::JobCenterResult;
use jobcenter_domain::ports::{LockGuard, ScheduleLock};

/// 基于数据库行锁的集群互斥锁
///
/// `SELECT ... FOR UPDATE`锁住`job_lock`表的指定行，事务提交前
/// 其他实例的同名获取会阻塞。锁的生命周期就是事务的生命周期，
/// 实例崩溃时连接断开，锁自动释放。
pub struct PostgresScheduleLock {
    pool: PgPool,
}

impl PostgresScheduleLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleLock for PostgresScheduleLock {
    async fn try_acquire(&self, key: &str) -> JobCenterResult<Option<Box<dyn LockGuard>>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_scalar::<_, String>(
            "SELECT lock_name FROM job_lock WHERE lock_name = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        if row.is_none() {
            // 锁行不存在说明schema没有初始化，放弃本轮而不是硬闯
            tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(PgLockGuard { tx })))
    }
}

struct PgLockGuard {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LockGuard for PgLockGuard {
    async fn release(self: Box<Self>) -> JobCenterResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
