use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tracing::info;

use jobcenter_api::{create_routes, AppState};
use jobcenter_core::config::AppConfig;
use jobcenter_dispatcher::{
    CompleteService, FailMonitor, LogRetentionService, RegistryService, ScheduleService,
    TriggerExecutor, TriggerPool, TriggerSink,
};
use jobcenter_domain::ports::{AlarmChannel, ExecutorClient, ScheduleLock};
use jobcenter_domain::repositories::{
    JobGroupRepository, JobInfoRepository, JobLogRepository, JobRegistryRepository,
};
use jobcenter_infrastructure::{
    create_pool, HttpExecutorClient, PostgresJobGroupRepository, PostgresJobLogRepository,
    PostgresJobRepository, PostgresRegistryRepository, PostgresScheduleLock, TracingAlarmChannel,
};

/// 应用组装根
///
/// 在这里把仓储、执行器客户端与各后台服务显式装配起来，
/// 组件之间只通过trait相互引用。
pub struct Application {
    config: AppConfig,
    router: axum::Router,
    schedule: Arc<ScheduleService>,
    trigger_pool: Arc<TriggerPool>,
    registry: Arc<RegistryService>,
    complete: Arc<CompleteService>,
    fail_monitor: Arc<FailMonitor>,
    log_retention: Arc<LogRetentionService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = create_pool(&config.database)
            .await
            .context("连接数据库失败")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("执行数据库迁移失败")?;

        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("安装指标采集器失败")?;

        // 仓储与出站客户端
        let job_repo: Arc<dyn JobInfoRepository> =
            Arc::new(PostgresJobRepository::new(pool.clone()));
        let group_repo: Arc<dyn JobGroupRepository> =
            Arc::new(PostgresJobGroupRepository::new(pool.clone()));
        let log_repo: Arc<dyn JobLogRepository> =
            Arc::new(PostgresJobLogRepository::new(pool.clone()));
        let registry_repo: Arc<dyn JobRegistryRepository> =
            Arc::new(PostgresRegistryRepository::new(pool.clone()));
        let lock: Arc<dyn ScheduleLock> = Arc::new(PostgresScheduleLock::new(pool.clone()));
        let client: Arc<dyn ExecutorClient> =
            Arc::new(HttpExecutorClient::new(config.server.access_token.clone()));

        // 触发链路：执行器 -> 快慢触发池
        let executor = Arc::new(TriggerExecutor::new(
            job_repo.clone(),
            group_repo.clone(),
            log_repo.clone(),
            client,
        ));
        let trigger_pool = TriggerPool::start(executor, &config.trigger_pool);
        let sink: Arc<dyn TriggerSink> = trigger_pool.clone();

        // 后台服务
        let schedule = ScheduleService::new(
            job_repo.clone(),
            lock,
            sink.clone(),
            config.trigger_pool.fast_max,
            config.trigger_pool.slow_max,
        );
        let registry = RegistryService::start(registry_repo, group_repo.clone());
        let complete = CompleteService::start(job_repo.clone(), log_repo.clone(), sink.clone());
        let channels: Vec<Arc<dyn AlarmChannel>> = vec![Arc::new(TracingAlarmChannel)];
        let fail_monitor = FailMonitor::new(job_repo, log_repo.clone(), sink.clone(), channels);
        let log_retention = LogRetentionService::new(log_repo, config.log.retention_days);

        let state = AppState {
            registry_service: registry.clone(),
            complete_service: complete.clone(),
            trigger_sink: sink,
            access_token: config.server.access_token.clone(),
            metrics_handle,
        };
        let router = create_routes(state);

        Ok(Self {
            config,
            router,
            schedule,
            trigger_pool,
            registry,
            complete,
            fail_monitor,
            log_retention,
        })
    }

    /// 启动所有后台服务与HTTP服务器，收到关闭信号后按序停机
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.schedule.start().await;
        self.fail_monitor.start().await;
        self.log_retention.start().await;

        let listener = tokio::net::TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("监听地址绑定失败: {}", self.config.server.bind_address))?;
        info!("HTTP服务启动: {}", self.config.server.bind_address);

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("HTTP服务异常退出")?;

        // 先停调度入口，再停触发池，保证已入队的触发有机会收尾
        self.schedule.stop().await;
        self.trigger_pool.stop().await;
        self.registry.stop().await;
        self.complete.stop().await;
        self.fail_monitor.stop().await;
        self.log_retention.stop().await;
        info!("所有后台服务已停止");
        Ok(())
    }
}
