use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use jobcenter_core::constants::{
    ADDRESS_TYPE_AUTO, BEAT_INTERVAL_SECONDS, DEAD_TIMEOUT_SECONDS, REGISTRY_GROUP_EXECUTOR,
};
use jobcenter_core::JobCenterResult;
use jobcenter_domain::messages::{RegistryParam, RpcReply};
use jobcenter_domain::repositories::{JobGroupRepository, JobRegistryRepository};

/// 注册写入队列深度，打满后降级为同步写
const REGISTRY_QUEUE_SIZE: usize = 2000;
/// 注册写入工作协程数
const REGISTRY_WORKERS: usize = 10;

enum RegistryOp {
    Register(RegistryParam),
    Remove(RegistryParam),
}

/// 执行器注册服务
///
/// 心跳写入走异步队列，接口立即应答，数据库慢不拖垮执行器的
/// 心跳线程。后台清理循环每30秒剔除超过90秒（3个心跳周期）
/// 未续期的死亡记录，并把存活地址刷新到自动注册的执行器组上。
pub struct RegistryService {
    registry_repo: Arc<dyn JobRegistryRepository>,
    tx: mpsc::Sender<RegistryOp>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryService {
    pub fn start(
        registry_repo: Arc<dyn JobRegistryRepository>,
        group_repo: Arc<dyn JobGroupRepository>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(REGISTRY_QUEUE_SIZE);
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());

        let writer = spawn_writers(rx, registry_repo.clone());
        let sweeper = {
            let registry_repo = registry_repo.clone();
            let stopped = stopped.clone();
            let stop_notify = stop_notify.clone();
            tokio::spawn(async move {
                sweep_loop(registry_repo, group_repo, stopped, stop_notify).await;
            })
        };

        info!("注册服务启动");
        Arc::new(Self {
            registry_repo,
            tx,
            stopped,
            stop_notify,
            handles: Mutex::new(vec![writer, sweeper]),
        })
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("注册服务已停止");
    }

    /// 注册/心跳续期，入队即应答
    pub async fn register(&self, param: RegistryParam) -> RpcReply<String> {
        if !param.is_valid() {
            return RpcReply::fail("注册参数不完整");
        }
        metrics::counter!("jobcenter_registry_heartbeat_total").increment(1);
        self.enqueue(RegistryOp::Register(param)).await;
        RpcReply::success_empty()
    }

    /// 摘除注册记录，入队即应答
    pub async fn unregister(&self, param: RegistryParam) -> RpcReply<String> {
        if !param.is_valid() {
            return RpcReply::fail("摘除参数不完整");
        }
        self.enqueue(RegistryOp::Remove(param)).await;
        RpcReply::success_empty()
    }

    async fn enqueue(&self, op: RegistryOp) {
        if let Err(err) = self.tx.try_send(op) {
            // 队列打满时降级为同步写，宁慢勿丢
            warn!("注册写入队列已满，降级为同步写");
            apply_op(&self.registry_repo, err.into_inner()).await;
        }
    }
}

fn spawn_writers(
    rx: mpsc::Receiver<RegistryOp>,
    repo: Arc<dyn JobRegistryRepository>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::new();
        for _ in 0..REGISTRY_WORKERS {
            let rx = rx.clone();
            let repo = repo.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let op = { rx.lock().await.recv().await };
                    match op {
                        Some(op) => apply_op(&repo, op).await,
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

async fn apply_op(repo: &Arc<dyn JobRegistryRepository>, op: RegistryOp) {
    let result = match &op {
        RegistryOp::Register(p) => {
            repo.upsert(&p.registry_group, &p.registry_key, &p.registry_value)
                .await
        }
        RegistryOp::Remove(p) => {
            repo.remove(&p.registry_group, &p.registry_key, &p.registry_value)
                .await
        }
    };
    if let Err(e) = result {
        error!("注册写入失败: {}", e);
    }
}

async fn sweep_loop(
    registry_repo: Arc<dyn JobRegistryRepository>,
    group_repo: Arc<dyn JobGroupRepository>,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
) {
    while !stopped.load(Ordering::SeqCst) {
        if let Err(e) = sweep_once(&registry_repo, &group_repo).await {
            error!("注册清理迭代异常: {}", e);
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(BEAT_INTERVAL_SECONDS as u64)) => {}
            _ = stop_notify.notified() => {}
        }
    }
    info!("注册清理循环退出");
}

/// 单轮清理：剔除死亡记录，重建自动注册组的地址列表
pub async fn sweep_once(
    registry_repo: &Arc<dyn JobRegistryRepository>,
    group_repo: &Arc<dyn JobGroupRepository>,
) -> JobCenterResult<()> {
    let dead_ids = registry_repo.find_dead_ids(DEAD_TIMEOUT_SECONDS).await?;
    if !dead_ids.is_empty() {
        info!("剔除死亡注册记录: {:?}", dead_ids);
        registry_repo.remove_by_ids(&dead_ids).await?;
    }

    // 存活地址按app聚合，排序去重后回写
    let alive = registry_repo.find_alive(DEAD_TIMEOUT_SECONDS).await?;
    let mut app_addresses: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in alive {
        if entry.registry_group != REGISTRY_GROUP_EXECUTOR {
            continue;
        }
        app_addresses
            .entry(entry.registry_key)
            .or_default()
            .push(entry.registry_value);
    }
    for addresses in app_addresses.values_mut() {
        addresses.sort();
        addresses.dedup();
    }

    let groups = group_repo.find_by_address_type(ADDRESS_TYPE_AUTO).await?;
    for group in groups {
        let address_list = app_addresses
            .get(&group.app_name)
            .map(|addresses| addresses.join(","));
        group_repo
            .update_address_list(group.id, address_list.as_deref())
            .await?;
    }

    metrics::gauge!("jobcenter_registry_alive_apps").set(app_addresses.len() as f64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::test_utils::{test_group, InMemoryStore};

    fn param(key: &str, value: &str) -> RegistryParam {
        RegistryParam {
            registry_group: REGISTRY_GROUP_EXECUTOR.to_string(),
            registry_key: key.to_string(),
            registry_value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_replies_immediately_and_persists() {
        let store = Arc::new(InMemoryStore::new());
        let service = RegistryService::start(store.clone(), store.clone());

        let reply = service.register(param("demo-executor", "10.0.0.1:9999")).await;
        assert!(reply.is_success());

        // 异步写入，稍等落库
        tokio::time::sleep(Duration::from_millis(100)).await;
        let alive = store.find_alive(90).await.unwrap();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].registry_value, "10.0.0.1:9999");
        service.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_param_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let service = RegistryService::start(store.clone(), store.clone());

        let reply = service.register(param("", "10.0.0.1:9999")).await;
        assert!(!reply.is_success());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_unregister_removes_entry() {
        let store = Arc::new(InMemoryStore::new());
        let service = RegistryService::start(store.clone(), store.clone());

        service.register(param("demo-executor", "10.0.0.1:9999")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.unregister(param("demo-executor", "10.0.0.1:9999")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.find_alive(90).await.unwrap().is_empty());
        service.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_and_rebuilds_address_list() {
        let store = Arc::new(InMemoryStore::new());
        store.put_group(test_group(1, &[])).await;

        // 两条存活心跳 + 一条过期心跳
        store
            .upsert(REGISTRY_GROUP_EXECUTOR, "demo-executor", "10.0.0.2:9999")
            .await
            .unwrap();
        store
            .upsert(REGISTRY_GROUP_EXECUTOR, "demo-executor", "10.0.0.1:9999")
            .await
            .unwrap();
        store
            .backdate_registry(
                "10.0.0.9:9999",
                Utc::now() - ChronoDuration::seconds(120),
            )
            .await;

        let registry_repo: Arc<dyn JobRegistryRepository> = store.clone();
        let group_repo: Arc<dyn JobGroupRepository> = store.clone();
        sweep_once(&registry_repo, &group_repo).await.unwrap();

        // 死亡记录被剔除，地址列表排序重建
        let group = store.get_group(1).await.unwrap();
        assert_eq!(
            group.address_list.as_deref(),
            Some("10.0.0.1:9999,10.0.0.2:9999")
        );
    }

    #[tokio::test]
    async fn test_sweep_clears_address_list_when_all_dead() {
        let store = Arc::new(InMemoryStore::new());
        let mut group = test_group(1, &["10.0.0.1:9999"]);
        group.address_type = ADDRESS_TYPE_AUTO;
        store.put_group(group).await;

        let registry_repo: Arc<dyn JobRegistryRepository> = store.clone();
        let group_repo: Arc<dyn JobGroupRepository> = store.clone();
        sweep_once(&registry_repo, &group_repo).await.unwrap();

        // 没有任何存活心跳时地址列表清空而不是保留旧值
        let group = store.get_group(1).await.unwrap();
        assert!(group.address_list.is_none());
    }

    #[tokio::test]
    async fn test_sweep_ignores_manual_groups() {
        let store = Arc::new(InMemoryStore::new());
        let mut group = test_group(1, &["192.168.1.1:9999"]);
        group.address_type = 1; // 手动录入
        store.put_group(group).await;

        let registry_repo: Arc<dyn JobRegistryRepository> = store.clone();
        let group_repo: Arc<dyn JobGroupRepository> = store.clone();
        sweep_once(&registry_repo, &group_repo).await.unwrap();

        // 手动录入的组不受注册表影响
        let group = store.get_group(1).await.unwrap();
        assert_eq!(group.address_list.as_deref(), Some("192.168.1.1:9999"));
    }
}
