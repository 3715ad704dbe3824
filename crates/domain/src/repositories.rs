use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobcenter_core::JobCenterResult;

use crate::entities::{JobGroup, JobInfo, JobLog, RegistryEntry};

/// 任务仓储
///
/// 调度引擎只依赖这里列出的查询/更新形态，管理侧CRUD不在此范围。
#[async_trait]
pub trait JobInfoRepository: Send + Sync {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobInfo>>;

    /// 查询到期任务：`trigger_status = 1`且`trigger_next_time <= max_next_time`，
    /// 按id升序，最多`limit`条
    async fn find_due(&self, max_next_time: i64, limit: i64) -> JobCenterResult<Vec<JobInfo>>;

    /// 批量回写扫描结果（trigger_last_time / trigger_next_time / trigger_status）
    async fn batch_update_schedule(&self, jobs: &[JobInfo]) -> JobCenterResult<()>;
}

/// 执行器组仓储
#[async_trait]
pub trait JobGroupRepository: Send + Sync {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobGroup>>;

    /// 按注册类型查询执行器组（0-自动注册，1-手动录入）
    async fn find_by_address_type(&self, address_type: i16) -> JobCenterResult<Vec<JobGroup>>;

    /// 刷新组的在线地址列表并更新时间戳
    async fn update_address_list(
        &self,
        id: i64,
        address_list: Option<&str>,
    ) -> JobCenterResult<()>;
}

/// 执行器注册表仓储
#[async_trait]
pub trait JobRegistryRepository: Send + Sync {
    /// 心跳续期：三元组存在则刷新时间戳，否则插入
    async fn upsert(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()>;

    /// 显式摘除
    async fn remove(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()>;

    /// 查询心跳超过`timeout_seconds`未续期的死亡记录ID
    async fn find_dead_ids(&self, timeout_seconds: i64) -> JobCenterResult<Vec<i64>>;

    async fn remove_by_ids(&self, ids: &[i64]) -> JobCenterResult<()>;

    /// 查询`timeout_seconds`内有心跳的存活记录
    async fn find_alive(&self, timeout_seconds: i64) -> JobCenterResult<Vec<RegistryEntry>>;
}

/// 调度日志仓储
#[async_trait]
pub trait JobLogRepository: Send + Sync {
    /// 插入日志并返回数据库生成的日志ID
    async fn create(&self, log: &JobLog) -> JobCenterResult<i64>;

    async fn load(&self, id: i64) -> JobCenterResult<Option<JobLog>>;

    /// 回写触发结果（地址、触发码、调度备注等）
    async fn update_trigger_info(&self, log: &JobLog) -> JobCenterResult<()>;

    /// 回写处理结果（handle_time / handle_code / handle_msg）
    async fn update_handle_info(&self, log: &JobLog) -> JobCenterResult<()>;

    /// 丢失任务检测：触发成功、尚无处理结果、触发时间早于`before`、
    /// 且记录的执行器地址已不在存活注册表中
    async fn find_lost_ids(&self, before: DateTime<Utc>) -> JobCenterResult<Vec<i64>>;

    /// 失败告警扫描：终态失败且`alarm_status = 0`的日志ID，按id升序限量
    async fn find_fail_ids(&self, limit: i64) -> JobCenterResult<Vec<i64>>;

    /// CAS修改告警状态，返回是否真的发生了修改。
    /// 集群环境下两个实例并发抢占同一条日志时只有一个能成功。
    async fn update_alarm_status(
        &self,
        id: i64,
        expected: i16,
        new_status: i16,
    ) -> JobCenterResult<bool>;

    /// 清理`before`之前触发的日志，返回删除行数
    async fn clean_before(&self, before: DateTime<Utc>) -> JobCenterResult<u64>;
}
