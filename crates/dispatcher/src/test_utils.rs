//! 测试替身：内存仓储、假执行器客户端、记录用的触发/告警通道。

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use jobcenter_core::{JobCenterError, JobCenterResult};
use jobcenter_domain::entities::{
    JobGroup, JobInfo, JobLog, MisfireStrategy, RegistryEntry, RouteStrategy, ScheduleType,
};
use jobcenter_domain::messages::{RpcReply, TriggerRequest};
use jobcenter_domain::ports::{AlarmChannel, ExecutorClient, LockGuard, ScheduleLock};
use jobcenter_domain::repositories::{
    JobGroupRepository, JobInfoRepository, JobLogRepository, JobRegistryRepository,
};

use crate::trigger_pool::{TriggerSink, TriggerTask};

/// 构造一个运行中的测试任务
pub fn test_job(id: i64) -> JobInfo {
    JobInfo {
        id,
        job_group: 1,
        job_desc: format!("测试任务{id}"),
        author: "admin".to_string(),
        schedule_type: ScheduleType::Cron,
        schedule_conf: "0/2 * * * * *".to_string(),
        misfire_strategy: MisfireStrategy::DoNothing,
        executor_route_strategy: RouteStrategy::First,
        executor_block_strategy: "SERIAL_EXECUTION".to_string(),
        executor_handler: "demoHandler".to_string(),
        executor_param: String::new(),
        executor_timeout: 0,
        executor_fail_retry_count: 0,
        child_job_id: String::new(),
        trigger_status: 1,
        trigger_last_time: 0,
        trigger_next_time: 0,
        add_time: Utc::now(),
        update_time: Utc::now(),
    }
}

/// 构造一个自动注册的测试执行器组
pub fn test_group(id: i64, addresses: &[&str]) -> JobGroup {
    JobGroup {
        id,
        app_name: "demo-executor".to_string(),
        title: "演示执行器".to_string(),
        address_type: 0,
        address_list: if addresses.is_empty() {
            None
        } else {
            Some(addresses.join(","))
        },
        update_time: Utc::now(),
    }
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<i64, JobInfo>,
    groups: HashMap<i64, JobGroup>,
    registry: Vec<RegistryEntry>,
    next_registry_id: i64,
    logs: BTreeMap<i64, JobLog>,
    next_log_id: i64,
}

/// 内存仓储，四个仓储接口共用一份状态
///
/// 共享状态是刻意的：丢失检测要在同一个存储里同时看到日志和
/// 注册表的存活情况。
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
        }
    }

    pub async fn put_job(&self, job: JobInfo) {
        self.inner.lock().await.jobs.insert(job.id, job);
    }

    pub async fn get_job(&self, id: i64) -> Option<JobInfo> {
        self.inner.lock().await.jobs.get(&id).cloned()
    }

    pub async fn put_group(&self, group: JobGroup) {
        self.inner.lock().await.groups.insert(group.id, group);
    }

    pub async fn get_group(&self, id: i64) -> Option<JobGroup> {
        self.inner.lock().await.groups.get(&id).cloned()
    }

    pub async fn all_logs(&self) -> Vec<JobLog> {
        self.inner.lock().await.logs.values().cloned().collect()
    }

    /// 三个仓储接口都有`load`，测试里用这个免歧义的取日志入口
    pub async fn get_log(&self, id: i64) -> Option<JobLog> {
        self.inner.lock().await.logs.get(&id).cloned()
    }

    /// 插入一条指定心跳时间的注册记录，用于模拟过期心跳
    pub async fn backdate_registry(&self, address: &str, update_time: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.next_registry_id += 1;
        let entry = RegistryEntry {
            id: inner.next_registry_id,
            registry_group: "EXECUTOR".to_string(),
            registry_key: "demo-executor".to_string(),
            registry_value: address.to_string(),
            update_time,
        };
        inner.registry.push(entry);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobInfoRepository for InMemoryStore {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobInfo>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn find_due(&self, max_next_time: i64, limit: i64) -> JobCenterResult<Vec<JobInfo>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<JobInfo> = inner
            .jobs
            .values()
            .filter(|j| j.trigger_status == 1 && j.trigger_next_time <= max_next_time)
            .cloned()
            .collect();
        due.sort_by_key(|j| j.id);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn batch_update_schedule(&self, jobs: &[JobInfo]) -> JobCenterResult<()> {
        let mut inner = self.inner.lock().await;
        for job in jobs {
            if let Some(stored) = inner.jobs.get_mut(&job.id) {
                stored.trigger_status = job.trigger_status;
                stored.trigger_last_time = job.trigger_last_time;
                stored.trigger_next_time = job.trigger_next_time;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobGroupRepository for InMemoryStore {
    async fn load(&self, id: i64) -> JobCenterResult<Option<JobGroup>> {
        Ok(self.inner.lock().await.groups.get(&id).cloned())
    }

    async fn find_by_address_type(&self, address_type: i16) -> JobCenterResult<Vec<JobGroup>> {
        let inner = self.inner.lock().await;
        let mut groups: Vec<JobGroup> = inner
            .groups
            .values()
            .filter(|g| g.address_type == address_type)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn update_address_list(
        &self,
        id: i64,
        address_list: Option<&str>,
    ) -> JobCenterResult<()> {
        let mut inner = self.inner.lock().await;
        let group = inner
            .groups
            .get_mut(&id)
            .ok_or(JobCenterError::JobGroupNotFound { id })?;
        group.address_list = address_list.map(|s| s.to_string());
        group.update_time = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobRegistryRepository for InMemoryStore {
    async fn upsert(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.registry.iter_mut().find(|e| {
            e.registry_group == group && e.registry_key == key && e.registry_value == value
        }) {
            entry.update_time = Utc::now();
            return Ok(());
        }
        inner.next_registry_id += 1;
        let entry = RegistryEntry {
            id: inner.next_registry_id,
            registry_group: group.to_string(),
            registry_key: key.to_string(),
            registry_value: value.to_string(),
            update_time: Utc::now(),
        };
        inner.registry.push(entry);
        Ok(())
    }

    async fn remove(&self, group: &str, key: &str, value: &str) -> JobCenterResult<()> {
        self.inner.lock().await.registry.retain(|e| {
            !(e.registry_group == group && e.registry_key == key && e.registry_value == value)
        });
        Ok(())
    }

    async fn find_dead_ids(&self, timeout_seconds: i64) -> JobCenterResult<Vec<i64>> {
        let deadline = Utc::now() - ChronoDuration::seconds(timeout_seconds);
        Ok(self
            .inner
            .lock()
            .await
            .registry
            .iter()
            .filter(|e| e.update_time < deadline)
            .map(|e| e.id)
            .collect())
    }

    async fn remove_by_ids(&self, ids: &[i64]) -> JobCenterResult<()> {
        self.inner
            .lock()
            .await
            .registry
            .retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn find_alive(&self, timeout_seconds: i64) -> JobCenterResult<Vec<RegistryEntry>> {
        let deadline = Utc::now() - ChronoDuration::seconds(timeout_seconds);
        Ok(self
            .inner
            .lock()
            .await
            .registry
            .iter()
            .filter(|e| e.update_time >= deadline)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobLogRepository for InMemoryStore {
    async fn create(&self, log: &JobLog) -> JobCenterResult<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_log_id += 1;
        let id = inner.next_log_id;
        let mut stored = log.clone();
        stored.id = id;
        inner.logs.insert(id, stored);
        Ok(id)
    }

    async fn load(&self, id: i64) -> JobCenterResult<Option<JobLog>> {
        Ok(self.inner.lock().await.logs.get(&id).cloned())
    }

    async fn update_trigger_info(&self, log: &JobLog) -> JobCenterResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .logs
            .get_mut(&log.id)
            .ok_or(JobCenterError::JobLogNotFound { id: log.id })?;
        stored.executor_address = log.executor_address.clone();
        stored.executor_handler = log.executor_handler.clone();
        stored.executor_param = log.executor_param.clone();
        stored.executor_sharding_param = log.executor_sharding_param.clone();
        stored.executor_fail_retry_count = log.executor_fail_retry_count;
        stored.trigger_code = log.trigger_code;
        stored.trigger_msg = log.trigger_msg.clone();
        Ok(())
    }

    async fn update_handle_info(&self, log: &JobLog) -> JobCenterResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .logs
            .get_mut(&log.id)
            .ok_or(JobCenterError::JobLogNotFound { id: log.id })?;
        stored.handle_time = log.handle_time;
        stored.handle_code = log.handle_code;
        stored.handle_msg = log.handle_msg.clone();
        Ok(())
    }

    async fn find_lost_ids(&self, before: DateTime<Utc>) -> JobCenterResult<Vec<i64>> {
        let inner = self.inner.lock().await;
        let alive_deadline = Utc::now() - ChronoDuration::seconds(90);
        let alive: HashSet<&str> = inner
            .registry
            .iter()
            .filter(|e| e.update_time >= alive_deadline)
            .map(|e| e.registry_value.as_str())
            .collect();
        Ok(inner
            .logs
            .values()
            .filter(|l| {
                l.trigger_code == 200
                    && l.handle_code == 0
                    && l.trigger_time.is_some_and(|t| t < before)
                    && l.executor_address
                        .as_deref()
                        .is_some_and(|a| !alive.contains(a))
            })
            .map(|l| l.id)
            .collect())
    }

    async fn find_fail_ids(&self, limit: i64) -> JobCenterResult<Vec<i64>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<i64> = inner
            .logs
            .values()
            .filter(|l| {
                let trigger_failed = l.trigger_code != 0 && l.trigger_code != 200;
                let handle_failed = l.handle_code == 500;
                (trigger_failed || handle_failed) && l.alarm_status == 0
            })
            .map(|l| l.id)
            .collect();
        ids.sort_unstable();
        ids.truncate(limit as usize);
        Ok(ids)
    }

    async fn update_alarm_status(
        &self,
        id: i64,
        expected: i16,
        new_status: i16,
    ) -> JobCenterResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.logs.get_mut(&id) {
            Some(log) if log.alarm_status == expected => {
                log.alarm_status = new_status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clean_before(&self, before: DateTime<Utc>) -> JobCenterResult<u64> {
        let mut inner = self.inner.lock().await;
        let before_count = inner.logs.len();
        inner
            .logs
            .retain(|_, l| !l.trigger_time.is_some_and(|t| t < before));
        Ok((before_count - inner.logs.len()) as u64)
    }
}

/// 只记录不执行的触发接收端
#[derive(Default)]
pub struct RecordingSink {
    tasks: Mutex<Vec<TriggerTask>>,
}

impl RecordingSink {
    pub async fn tasks(&self) -> Vec<TriggerTask> {
        self.tasks.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.tasks.lock().await.clear();
    }
}

#[async_trait]
impl TriggerSink for RecordingSink {
    async fn submit(&self, task: TriggerTask) {
        self.tasks.lock().await.push(task);
    }
}

/// 假执行器客户端
///
/// 默认一切成功；可以把地址标记为死亡（心跳失败）或忙碌
/// （空闲检测失败），并记录所有run调用。
#[derive(Default)]
pub struct FakeExecutorClient {
    dead: Mutex<HashSet<String>>,
    busy: Mutex<HashSet<String>>,
    runs: Mutex<Vec<(String, TriggerRequest)>>,
}

impl FakeExecutorClient {
    pub async fn mark_dead(&self, address: &str) {
        self.dead.lock().await.insert(address.to_string());
    }

    pub async fn mark_busy(&self, address: &str) {
        self.busy.lock().await.insert(address.to_string());
    }

    pub async fn run_calls(&self) -> Vec<(String, TriggerRequest)> {
        self.runs.lock().await.clone()
    }
}

#[async_trait]
impl ExecutorClient for FakeExecutorClient {
    async fn beat(&self, address: &str) -> RpcReply<String> {
        if self.dead.lock().await.contains(address) {
            RpcReply::fail("connection refused")
        } else {
            RpcReply::success_empty()
        }
    }

    async fn idle_beat(&self, address: &str, _job_id: i64) -> RpcReply<String> {
        if self.dead.lock().await.contains(address) {
            RpcReply::fail("connection refused")
        } else if self.busy.lock().await.contains(address) {
            RpcReply::fail("job is running")
        } else {
            RpcReply::success_empty()
        }
    }

    async fn run(&self, address: &str, request: &TriggerRequest) -> RpcReply<String> {
        if self.dead.lock().await.contains(address) {
            return RpcReply::fail("connection refused");
        }
        self.runs
            .lock()
            .await
            .push((address.to_string(), request.clone()));
        RpcReply::success_empty()
    }

    async fn kill(&self, address: &str, _job_id: i64) -> RpcReply<String> {
        if self.dead.lock().await.contains(address) {
            RpcReply::fail("connection refused")
        } else {
            RpcReply::success_empty()
        }
    }
}

struct NoopGuard;

#[async_trait]
impl LockGuard for NoopGuard {
    async fn release(self: Box<Self>) -> JobCenterResult<()> {
        Ok(())
    }
}

/// 总能拿到的锁
pub struct AlwaysFreeLock;

#[async_trait]
impl ScheduleLock for AlwaysFreeLock {
    async fn try_acquire(&self, _key: &str) -> JobCenterResult<Option<Box<dyn LockGuard>>> {
        Ok(Some(Box::new(NoopGuard)))
    }
}

/// 永远被别人持有的锁，模拟集群竞争失败
pub struct NeverFreeLock;

#[async_trait]
impl ScheduleLock for NeverFreeLock {
    async fn try_acquire(&self, _key: &str) -> JobCenterResult<Option<Box<dyn LockGuard>>> {
        Ok(None)
    }
}

/// 记录告警次数的通道
#[derive(Default)]
pub struct RecordingAlarmChannel {
    count: Mutex<u32>,
}

impl RecordingAlarmChannel {
    pub async fn alarm_count(&self) -> u32 {
        *self.count.lock().await
    }
}

#[async_trait]
impl AlarmChannel for RecordingAlarmChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_alarm(&self, _job: &JobInfo, _log: &JobLog) -> JobCenterResult<()> {
        *self.count.lock().await += 1;
        Ok(())
    }
}

/// 永远发送失败的通道
pub struct FlakyAlarmChannel;

#[async_trait]
impl AlarmChannel for FlakyAlarmChannel {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn send_alarm(&self, _job: &JobInfo, _log: &JobLog) -> JobCenterResult<()> {
        Err(JobCenterError::Internal("告警通道不可用".to_string()))
    }
}
