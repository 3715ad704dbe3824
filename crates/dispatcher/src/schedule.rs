use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobcenter_core::constants::PRE_READ_MS;
use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::{MisfireStrategy, TriggerType};
use jobcenter_domain::ports::ScheduleLock;
use jobcenter_domain::repositories::JobInfoRepository;

use crate::cron_utils::refresh_next_valid_time;
use crate::trigger_pool::{TriggerSink, TriggerTask};

/// 集群扫描互斥锁的键
const SCHEDULE_LOCK_KEY: &str = "schedule_lock";

/// 时间轮的秒级槽位数
const RING_SECONDS: i64 = 60;

/// 停机时时间轮数据的最大排空等待（秒）
const RING_DRAIN_SECONDS: i64 = 8;

/// 调度服务
///
/// 两个后台循环协同工作：扫描循环每5秒预读一个窗口内的到期任务，
/// 过近的触发按秒暂存进时间轮；时间轮循环每秒弹出当前槽位下发。
/// 扫描迭代全程持有集群互斥锁，保证多实例部署时同一窗口只被
/// 处理一次。
pub struct ScheduleService {
    job_repo: Arc<dyn JobInfoRepository>,
    lock: Arc<dyn ScheduleLock>,
    sink: Arc<dyn TriggerSink>,
    /// 秒槽位 -> 任务ID列表
    ring: Arc<Mutex<HashMap<i64, Vec<i64>>>>,
    /// 单轮预读上限，取快慢池容量之和的20倍
    pre_read_count: i64,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScheduleService {
    pub fn new(
        job_repo: Arc<dyn JobInfoRepository>,
        lock: Arc<dyn ScheduleLock>,
        sink: Arc<dyn TriggerSink>,
        fast_max: usize,
        slow_max: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_repo,
            lock,
            sink,
            ring: Arc::new(Mutex::new(HashMap::new())),
            pre_read_count: ((fast_max + slow_max) * 20) as i64,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// 启动扫描循环与时间轮循环
    pub async fn start(self: &Arc<Self>) {
        let scan = {
            let service = self.clone();
            tokio::spawn(async move { service.scan_loop().await })
        };
        let ring = {
            let service = self.clone();
            tokio::spawn(async move { service.ring_loop().await })
        };
        self.handles.lock().await.extend([scan, ring]);
        info!("调度服务启动: pre_read_count={}", self.pre_read_count);
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("调度服务已停止");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// 可被停止打断的睡眠
    async fn sleep_interruptible(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_notify.notified() => {}
        }
    }

    async fn scan_loop(&self) {
        // 先对齐到整秒，保证扫描节拍与时间轮槽位一致
        self.sleep_interruptible(Duration::from_millis(
            (5000 - Utc::now().timestamp_millis() % 1000) as u64,
        ))
        .await;

        while !self.is_stopped() {
            let started = Instant::now();
            let found = match self.scan_once().await {
                Ok(found) => found,
                Err(e) => {
                    error!("扫描迭代异常: {}", e);
                    false
                }
            };

            // 单轮耗时不足1秒时对齐下一个节拍：
            // 预读到任务则1秒后紧接着扫，空轮则直接睡到下个5秒窗口
            if started.elapsed() < Duration::from_millis(1000) && !self.is_stopped() {
                let base: i64 = if found { 1000 } else { PRE_READ_MS };
                let sleep_ms = base - Utc::now().timestamp_millis() % 1000;
                self.sleep_interruptible(Duration::from_millis(sleep_ms.max(0) as u64))
                    .await;
            }
        }
        info!("扫描循环退出");
    }

    /// 单轮扫描：预读、分类处理、批量回写
    ///
    /// 返回本轮是否预读到了任务，决定下一轮的节奏。
    pub async fn scan_once(&self) -> JobCenterResult<bool> {
        let Some(guard) = self.lock.try_acquire(SCHEDULE_LOCK_KEY).await? else {
            // 锁被其他实例持有，本轮放弃
            debug!("未获取到调度锁，跳过本轮扫描");
            return Ok(false);
        };

        let result = self.scan_window().await;
        guard.release().await?;
        result
    }

    async fn scan_window(&self) -> JobCenterResult<bool> {
        let now = Utc::now().timestamp_millis();
        let mut jobs = self
            .job_repo
            .find_due(now + PRE_READ_MS, self.pre_read_count)
            .await?;
        if jobs.is_empty() {
            return Ok(false);
        }

        metrics::counter!("jobcenter_scan_jobs_total").increment(jobs.len() as u64);

        for job in jobs.iter_mut() {
            if now > job.trigger_next_time + PRE_READ_MS {
                // 触发时间已超出一个完整窗口：按过期策略补偿
                warn!(
                    "任务 {} 调度过期: next={} now={}",
                    job.id, job.trigger_next_time, now
                );
                if job.misfire_strategy == MisfireStrategy::FireOnceNow {
                    self.sink
                        .submit(TriggerTask::new(job.id, TriggerType::Misfire))
                        .await;
                }
                refresh_next_valid_time(job, now);
            } else if now > job.trigger_next_time {
                // 窗口内的到期任务：立即下发
                self.sink
                    .submit(TriggerTask::new(job.id, TriggerType::Cron))
                    .await;
                refresh_next_valid_time(job, now);

                // 下一次触发仍落在本窗口内的密集任务，直接暂存进时间轮
                if job.is_running() && now + PRE_READ_MS > job.trigger_next_time {
                    let next = job.trigger_next_time;
                    self.push_ring((next / 1000) % RING_SECONDS, job.id).await;
                    refresh_next_valid_time(job, next);
                }
            } else {
                // 尚未到期的预读任务：按触发秒暂存进时间轮
                let next = job.trigger_next_time;
                self.push_ring((next / 1000) % RING_SECONDS, job.id).await;
                refresh_next_valid_time(job, next);
            }
        }

        self.job_repo.batch_update_schedule(&jobs).await?;
        Ok(true)
    }

    async fn push_ring(&self, second: i64, job_id: i64) {
        self.ring.lock().await.entry(second).or_default().push(job_id);
    }

    async fn ring_loop(&self) {
        loop {
            // 对齐整秒
            let sleep_ms = 1000 - Utc::now().timestamp_millis() % 1000;
            self.sleep_interruptible(Duration::from_millis(sleep_ms as u64)).await;
            if self.is_stopped() {
                break;
            }
            self.tick_ring(Utc::now().timestamp_millis()).await;
        }
        self.drain_ring().await;
        info!("时间轮循环退出");
    }

    /// 停机收尾：已暂存的近期触发逐秒放出，最多等待[`RING_DRAIN_SECONDS`]秒，
    /// 不静默丢弃
    async fn drain_ring(&self) {
        for _ in 0..RING_DRAIN_SECONDS {
            if self.ring.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(
                (1000 - Utc::now().timestamp_millis() % 1000) as u64,
            ))
            .await;
            self.tick_ring(Utc::now().timestamp_millis()).await;
        }
    }

    /// 弹出当前秒与前一秒两个槽位并下发
    ///
    /// 多弹一个槽位是为了兜住节拍抖动：上一秒的槽位如果因为
    /// 循环延迟没被消费，顺延到这一秒处理而不是丢失。
    pub async fn tick_ring(&self, now_millis: i64) {
        let now_second = (now_millis / 1000) % RING_SECONDS;
        let mut job_ids = Vec::new();
        {
            let mut ring = self.ring.lock().await;
            for offset in 0..2 {
                let slot = (now_second - offset + RING_SECONDS) % RING_SECONDS;
                if let Some(ids) = ring.remove(&slot) {
                    job_ids.extend(ids);
                }
            }
        }

        if job_ids.is_empty() {
            return;
        }
        debug!("时间轮触发: second={} jobs={:?}", now_second, job_ids);
        for job_id in job_ids {
            self.sink
                .submit(TriggerTask::new(job_id, TriggerType::Cron))
                .await;
        }
    }

    #[cfg(test)]
    async fn ring_slot(&self, second: i64) -> Vec<i64> {
        self.ring
            .lock()
            .await
            .get(&second)
            .cloned()
            .unwrap_or_default()
    }
}
