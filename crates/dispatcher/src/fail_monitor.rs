use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::{alarm_status, JobInfo, JobLog, TriggerType};
use jobcenter_domain::ports::AlarmChannel;
use jobcenter_domain::repositories::{JobInfoRepository, JobLogRepository};

use crate::trigger_pool::{TriggerSink, TriggerTask};

/// 失败扫描周期
const MONITOR_INTERVAL_SECONDS: u64 = 10;
/// 单轮处理的失败日志上限
const MONITOR_BATCH_SIZE: i64 = 1000;

/// 失败监控服务
///
/// 每10秒扫描终态失败且未告警的日志。先CAS抢占告警状态拿到
/// 处理权（集群多实例只有一个能抢到），再做两件事：剩余重试
/// 次数大于0时递减一次并重新下发；逐个通知所有告警通道。
pub struct FailMonitor {
    job_repo: Arc<dyn JobInfoRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    sink: Arc<dyn TriggerSink>,
    channels: Vec<Arc<dyn AlarmChannel>>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FailMonitor {
    pub fn new(
        job_repo: Arc<dyn JobInfoRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        sink: Arc<dyn TriggerSink>,
        channels: Vec<Arc<dyn AlarmChannel>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_repo,
            log_repo,
            sink,
            channels,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(self: &Arc<Self>) {
        let handle = {
            let monitor = self.clone();
            tokio::spawn(async move { monitor.monitor_loop().await })
        };
        self.handles.lock().await.push(handle);
        info!("失败监控启动: channels={}", self.channels.len());
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("失败监控已停止");
    }

    async fn monitor_loop(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            if let Err(e) = self.monitor_once().await {
                error!("失败监控迭代异常: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(MONITOR_INTERVAL_SECONDS)) => {}
                _ = self.stop_notify.notified() => {}
            }
        }
        info!("失败监控循环退出");
    }

    /// 单轮失败处理
    pub async fn monitor_once(&self) -> JobCenterResult<()> {
        let fail_ids = self.log_repo.find_fail_ids(MONITOR_BATCH_SIZE).await?;
        for id in fail_ids {
            // CAS抢占：0 -> -1，抢不到说明其他实例在处理
            if !self
                .log_repo
                .update_alarm_status(id, alarm_status::UNSET, alarm_status::LOCKED)
                .await?
            {
                continue;
            }

            let Some(log) = self.log_repo.load(id).await? else {
                continue;
            };
            let job = self.job_repo.load(log.job_id).await?;

            self.retry_if_needed(&log).await?;

            let final_status = match &job {
                None => alarm_status::NOT_NEEDED,
                Some(job) => {
                    if self.send_alarms(job, &log).await {
                        alarm_status::SUCCEEDED
                    } else {
                        alarm_status::FAILED
                    }
                }
            };
            self.log_repo
                .update_alarm_status(id, alarm_status::LOCKED, final_status)
                .await?;
            metrics::counter!("jobcenter_fail_alarm_total").increment(1);
        }
        Ok(())
    }

    /// 剩余重试次数大于0时递减重发，并把重试动作追加到调度备注
    async fn retry_if_needed(&self, log: &JobLog) -> JobCenterResult<()> {
        if log.executor_fail_retry_count <= 0 {
            return Ok(());
        }

        let mut task = TriggerTask::new(log.job_id, TriggerType::Retry);
        task.fail_retry_count = log.executor_fail_retry_count - 1;
        task.sharding_param = log
            .executor_sharding_param
            .as_deref()
            .and_then(parse_sharding_param);
        task.executor_param = log.executor_param.clone();
        self.sink.submit(task).await;

        let mut updated = log.clone();
        let note = format!(
            "{}\n失败重试触发: 剩余重试次数 {}",
            updated.trigger_msg.as_deref().unwrap_or(""),
            log.executor_fail_retry_count - 1
        );
        updated.trigger_msg = Some(note);
        self.log_repo.update_trigger_info(&updated).await?;
        metrics::counter!("jobcenter_fail_retry_total").increment(1);
        Ok(())
    }

    /// 逐个通道发送告警，单个通道失败不影响其他通道
    ///
    /// 返回是否全部成功；没有配置任何通道时视为成功。
    async fn send_alarms(&self, job: &JobInfo, log: &JobLog) -> bool {
        let mut all_ok = true;
        for channel in &self.channels {
            if let Err(e) = channel.send_alarm(job, log).await {
                warn!(
                    "告警通道 {} 发送失败: job_id={} log_id={} error={}",
                    channel.name(),
                    job.id,
                    log.id,
                    e
                );
                all_ok = false;
            }
        }
        all_ok
    }
}

/// 解析 "index/total" 形式的分片参数
fn parse_sharding_param(raw: &str) -> Option<(i32, i32)> {
    let (index, total) = raw.split_once('/')?;
    Some((index.trim().parse().ok()?, total.trim().parse().ok()?))
}
