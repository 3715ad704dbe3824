use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use jobcenter_core::constants::HANDLE_MSG_MAX_LEN;
use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::{JobLog, TriggerType};
use jobcenter_domain::messages::{HandleCallbackParam, RpcReply, FAIL_CODE, SUCCESS_CODE};
use jobcenter_domain::repositories::{JobInfoRepository, JobLogRepository};

use crate::trigger_pool::{TriggerSink, TriggerTask};

/// 回调写入队列深度
const CALLBACK_QUEUE_SIZE: usize = 3000;
/// 回调处理工作协程数
const CALLBACK_WORKERS: usize = 20;

/// 丢失检测周期
const LOST_CHECK_INTERVAL_SECONDS: u64 = 60;
/// 触发成功但超过该时长无回调且执行器已失联的任务判定为丢失
const LOST_AFTER_MINUTES: i64 = 10;

/// 任务完成服务
///
/// 承接执行器的结果回调：去重、截断、落库，成功时联动子任务。
/// 配套的丢失检测循环每分钟把「触发成功、执行器已失联、十分钟
/// 无回调」的日志标记为失败，避免永远停在处理中。
pub struct CompleteService {
    job_repo: Arc<dyn JobInfoRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    sink: Arc<dyn TriggerSink>,
    tx: mpsc::Sender<HandleCallbackParam>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CompleteService {
    pub fn start(
        job_repo: Arc<dyn JobInfoRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        sink: Arc<dyn TriggerSink>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(CALLBACK_QUEUE_SIZE);
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());

        let service = Arc::new(Self {
            job_repo,
            log_repo,
            sink,
            tx,
            stopped,
            stop_notify,
            handles: Mutex::new(Vec::new()),
        });

        let workers = spawn_callback_workers(rx, service.clone());
        let monitor = {
            let service = service.clone();
            tokio::spawn(async move { service.lost_monitor_loop().await })
        };
        // 新建的锁不存在竞争，try_lock必然成功
        if let Ok(mut handles) = service.handles.try_lock() {
            handles.extend([workers, monitor]);
        }

        info!("任务完成服务启动");
        service
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("任务完成服务已停止");
    }

    /// 接收一批回调，入队即应答
    pub async fn callback(&self, params: Vec<HandleCallbackParam>) -> RpcReply<String> {
        for param in params {
            if let Err(err) = self.tx.try_send(param) {
                // 队列打满时降级为同步处理，回调绝不丢弃
                warn!("回调队列已满，降级为同步处理");
                if let Err(e) = self.process_callback(err.into_inner()).await {
                    error!("回调处理失败: {}", e);
                }
            }
        }
        RpcReply::success_empty()
    }

    /// 处理单条回调：去重后写入处理结果并收尾
    pub async fn process_callback(&self, param: HandleCallbackParam) -> JobCenterResult<()> {
        let Some(mut log) = self.log_repo.load(param.log_id).await? else {
            warn!("回调丢弃，日志不存在: log_id={}", param.log_id);
            return Ok(());
        };

        // 已有处理结果的日志拒绝重复回调
        if log.handle_code > 0 {
            warn!(
                "重复回调已拒绝: log_id={} handle_code={}",
                log.id, log.handle_code
            );
            metrics::counter!("jobcenter_callback_duplicate_total").increment(1);
            return Ok(());
        }

        log.handle_time = Some(Utc::now());
        log.handle_code = param.handle_code;
        log.handle_msg = param.handle_msg;
        self.finish(&mut log).await?;

        let outcome = if param.handle_code == SUCCESS_CODE { "success" } else { "fail" };
        metrics::counter!("jobcenter_callback_total", "outcome" => outcome).increment(1);
        Ok(())
    }

    /// 收尾一条日志：成功时联动子任务，截断超长消息后落库
    ///
    /// 回调路径与丢失检测路径共用，保证子任务联动只在这里发生一次。
    async fn finish(&self, log: &mut JobLog) -> JobCenterResult<()> {
        if log.handle_code == SUCCESS_CODE {
            if let Some(job) = self.job_repo.load(log.job_id).await? {
                let child_ids = job.child_job_ids();
                if !child_ids.is_empty() {
                    let mut summary = String::from("\n\n触发子任务:");
                    for (i, child_id) in child_ids.iter().enumerate() {
                        self.sink
                            .submit(TriggerTask::new(*child_id, TriggerType::Parent))
                            .await;
                        summary.push_str(&format!(
                            "\n{}/{} [任务ID-{}] 触发成功",
                            i + 1,
                            child_ids.len(),
                            child_id
                        ));
                    }
                    let msg = log.handle_msg.get_or_insert_with(String::new);
                    msg.push_str(&summary);
                }
            }
        }

        // 超长消息截断，避免单条日志撑爆存储
        if let Some(msg) = &mut log.handle_msg {
            if msg.chars().count() > HANDLE_MSG_MAX_LEN {
                *msg = msg.chars().take(HANDLE_MSG_MAX_LEN).collect();
            }
        }

        self.log_repo.update_handle_info(log).await
    }

    async fn lost_monitor_loop(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            if let Err(e) = self.detect_lost_once().await {
                error!("丢失检测迭代异常: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(LOST_CHECK_INTERVAL_SECONDS)) => {}
                _ = self.stop_notify.notified() => {}
            }
        }
        info!("丢失检测循环退出");
    }

    /// 单轮丢失检测：把失联任务标记为失败
    pub async fn detect_lost_once(&self) -> JobCenterResult<()> {
        let before = Utc::now() - ChronoDuration::minutes(LOST_AFTER_MINUTES);
        let lost_ids = self.log_repo.find_lost_ids(before).await?;
        if lost_ids.is_empty() {
            return Ok(());
        }

        warn!("检测到丢失任务: {:?}", lost_ids);
        metrics::counter!("jobcenter_lost_jobs_total").increment(lost_ids.len() as u64);

        for id in lost_ids {
            let Some(mut log) = self.log_repo.load(id).await? else {
                continue;
            };
            log.handle_time = Some(Utc::now());
            log.handle_code = FAIL_CODE;
            log.handle_msg = Some("任务结果丢失，执行器已失联，标记失败".to_string());
            self.finish(&mut log).await?;
        }
        Ok(())
    }
}

fn spawn_callback_workers(
    rx: mpsc::Receiver<HandleCallbackParam>,
    service: Arc<CompleteService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::new();
        for _ in 0..CALLBACK_WORKERS {
            let rx = rx.clone();
            let service = service.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let param = { rx.lock().await.recv().await };
                    match param {
                        Some(param) => {
                            if let Err(e) = service.process_callback(param).await {
                                error!("回调处理失败: {}", e);
                            }
                        }
                        None => break,
                    }
                }
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }
    })
}
