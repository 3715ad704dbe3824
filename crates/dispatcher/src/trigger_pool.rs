use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use jobcenter_core::config::TriggerPoolConfig;
use jobcenter_domain::entities::TriggerType;

/// 慢任务判定阈值：单次下发耗时超过该值计一次超时
const SLOW_COST_MS: u128 = 500;
/// 当前分钟内超时次数超过该值的任务进入慢速池
const SLOW_COUNT_THRESHOLD: u32 = 10;

const FAST_QUEUE_SIZE: usize = 1000;
const SLOW_QUEUE_SIZE: usize = 2000;

/// 一次触发请求
///
/// `fail_retry_count`为负表示使用任务自身配置的重试次数；
/// 重试触发时由失败监控传入递减后的剩余次数。
#[derive(Debug, Clone)]
pub struct TriggerTask {
    pub job_id: i64,
    pub trigger_type: TriggerType,
    pub fail_retry_count: i32,
    /// 分片参数 (index, total)，仅失败重试时回放原分片
    pub sharding_param: Option<(i32, i32)>,
    /// 执行参数覆盖，None时使用任务配置
    pub executor_param: Option<String>,
}

impl TriggerTask {
    pub fn new(job_id: i64, trigger_type: TriggerType) -> Self {
        Self {
            job_id,
            trigger_type,
            fail_retry_count: -1,
            sharding_param: None,
            executor_param: None,
        }
    }
}

/// 触发提交面
///
/// 扫描线程、时间轮、失败重试、子任务联动都只依赖这个口子，
/// 不关心背后是线程池还是同步执行。
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn submit(&self, task: TriggerTask);
}

/// 快慢双触发池
///
/// 包装真正执行下发的内层sink。提交时按任务近期表现分流：
/// 当前分钟内超时（耗时>500ms）超过10次的任务走慢速池，避免
/// 个别慢执行器拖垮整个快速通道。队列打满时降级为提交方就地
/// 执行，触发请求绝不丢弃。
pub struct TriggerPool {
    runner: Arc<dyn TriggerSink>,
    fast_tx: mpsc::Sender<TriggerTask>,
    slow_tx: mpsc::Sender<TriggerTask>,
    slow_counters: Arc<Mutex<HashMap<i64, u32>>>,
    counter_minute: Arc<AtomicI64>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerPool {
    pub fn start(runner: Arc<dyn TriggerSink>, config: &TriggerPoolConfig) -> Arc<Self> {
        let (fast_tx, fast_rx) = mpsc::channel(FAST_QUEUE_SIZE);
        let (slow_tx, slow_rx) = mpsc::channel(SLOW_QUEUE_SIZE);

        let slow_counters: Arc<Mutex<HashMap<i64, u32>>> = Arc::new(Mutex::new(HashMap::new()));
        let counter_minute = Arc::new(AtomicI64::new(current_minute()));

        let fast_worker = spawn_pool_worker(
            "fast",
            fast_rx,
            config.fast_max,
            runner.clone(),
            slow_counters.clone(),
            counter_minute.clone(),
        );
        let slow_worker = spawn_pool_worker(
            "slow",
            slow_rx,
            config.slow_max,
            runner.clone(),
            slow_counters.clone(),
            counter_minute.clone(),
        );

        info!(
            "触发池启动: fast_max={} slow_max={}",
            config.fast_max, config.slow_max
        );

        Arc::new(Self {
            runner,
            fast_tx,
            slow_tx,
            slow_counters,
            counter_minute,
            workers: Mutex::new(vec![fast_worker, slow_worker]),
        })
    }

    /// 停止分发线程。队列中尚未执行的任务会被丢弃，
    /// 调度过期补偿会在下次启动后接住它们。
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
        info!("触发池已停止");
    }

    /// 分钟翻转时整体清空超时计数
    async fn rollover_minute(&self) {
        let minute = current_minute();
        if self.counter_minute.swap(minute, Ordering::SeqCst) != minute {
            self.slow_counters.lock().await.clear();
        }
    }

    async fn is_slow_job(&self, job_id: i64) -> bool {
        self.slow_counters
            .lock()
            .await
            .get(&job_id)
            .copied()
            .unwrap_or(0)
            > SLOW_COUNT_THRESHOLD
    }
}

#[async_trait]
impl TriggerSink for TriggerPool {
    async fn submit(&self, task: TriggerTask) {
        self.rollover_minute().await;

        let (pool_name, tx) = if self.is_slow_job(task.job_id).await {
            ("slow", &self.slow_tx)
        } else {
            ("fast", &self.fast_tx)
        };

        metrics::counter!("jobcenter_trigger_submitted_total", "pool" => pool_name).increment(1);

        if let Err(err) = tx.try_send(task) {
            let task = err.into_inner();
            warn!(
                "触发池 {} 队列已满，任务 {} 降级为就地执行",
                pool_name, task.job_id
            );
            metrics::counter!("jobcenter_trigger_inline_total", "pool" => pool_name).increment(1);
            run_and_record(
                &self.runner,
                &self.slow_counters,
                &self.counter_minute,
                task,
            )
            .await;
        }
    }
}

fn spawn_pool_worker(
    name: &'static str,
    mut rx: mpsc::Receiver<TriggerTask>,
    max_workers: usize,
    runner: Arc<dyn TriggerSink>,
    slow_counters: Arc<Mutex<HashMap<i64, u32>>>,
    counter_minute: Arc<AtomicI64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(max_workers));
        while let Some(task) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let runner = runner.clone();
            let slow_counters = slow_counters.clone();
            let counter_minute = counter_minute.clone();
            tokio::spawn(async move {
                run_and_record(&runner, &slow_counters, &counter_minute, task).await;
                drop(permit);
            });
        }
        info!("触发池 {} 分发线程退出", name);
    })
}

/// 执行一次下发并记录耗时，慢下发计入当前分钟的超时计数
async fn run_and_record(
    runner: &Arc<dyn TriggerSink>,
    slow_counters: &Arc<Mutex<HashMap<i64, u32>>>,
    counter_minute: &Arc<AtomicI64>,
    task: TriggerTask,
) {
    let job_id = task.job_id;
    let started = Instant::now();
    runner.submit(task).await;
    let cost = started.elapsed();

    metrics::histogram!("jobcenter_trigger_cost_seconds").record(cost.as_secs_f64());

    if cost.as_millis() > SLOW_COST_MS {
        let minute = current_minute();
        let mut counters = slow_counters.lock().await;
        if counter_minute.swap(minute, Ordering::SeqCst) != minute {
            counters.clear();
        }
        *counters.entry(job_id).or_insert(0) += 1;
    }
}

fn current_minute() -> i64 {
    chrono::Utc::now().timestamp() / 60
}
