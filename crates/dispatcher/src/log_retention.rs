use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use jobcenter_core::JobCenterResult;
use jobcenter_domain::repositories::JobLogRepository;

/// 清理检查周期，真正的删除由日界判断控制
const CHECK_INTERVAL_SECONDS: u64 = 3600;

/// 调度日志清理服务
///
/// 保留天数达到7天以上才启用，每天清理一次`retention_days`天前
/// 触发的日志。删除按天整界切割，当天内多次重启不会重复扫描。
pub struct LogRetentionService {
    log_repo: Arc<dyn JobLogRepository>,
    retention_days: i64,
    /// 上一次执行清理的日序号（timestamp/86400）
    last_clean_day: Mutex<i64>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LogRetentionService {
    pub fn new(log_repo: Arc<dyn JobLogRepository>, retention_days: i64) -> Arc<Self> {
        Arc::new(Self {
            log_repo,
            retention_days,
            last_clean_day: Mutex::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(self: &Arc<Self>) {
        if self.retention_days < 7 {
            info!(
                "日志清理未启用: retention_days={} 小于7天",
                self.retention_days
            );
            return;
        }
        let handle = {
            let service = self.clone();
            tokio::spawn(async move { service.clean_loop().await })
        };
        self.handles.lock().await.push(handle);
        info!("日志清理启动: retention_days={}", self.retention_days);
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    async fn clean_loop(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            if let Err(e) = self.clean_once().await {
                error!("日志清理迭代异常: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(CHECK_INTERVAL_SECONDS)) => {}
                _ = self.stop_notify.notified() => {}
            }
        }
        info!("日志清理循环退出");
    }

    /// 每天最多清理一次
    pub async fn clean_once(&self) -> JobCenterResult<()> {
        let today = Utc::now().timestamp() / 86_400;
        let mut last_day = self.last_clean_day.lock().await;
        if *last_day == today {
            return Ok(());
        }

        let before = Utc::now() - ChronoDuration::days(self.retention_days);
        let removed = self.log_repo.clean_before(before).await?;
        *last_day = today;

        if removed > 0 {
            info!("清理过期调度日志 {} 条: before={}", removed, before);
        }
        metrics::counter!("jobcenter_log_cleaned_total").increment(removed);
        Ok(())
    }
}
