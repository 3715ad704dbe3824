use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::{JobGroup, JobInfo, JobLog, RouteStrategy, TriggerType};
use jobcenter_domain::messages::{RpcReply, TriggerRequest};
use jobcenter_domain::ports::ExecutorClient;
use jobcenter_domain::repositories::{JobGroupRepository, JobInfoRepository, JobLogRepository};

use crate::strategies::ExecutorRouteTable;
use crate::trigger_pool::{TriggerSink, TriggerTask};

/// 触发执行器
///
/// 把一次触发请求展开为一条或多条（分片广播）下发：先落调度
/// 日志，再路由选址，最后RPC下发并回写触发结果。任何一步失败
/// 都体现为日志里的失败触发码，绝不向调用方抛出。
pub struct TriggerExecutor {
    job_repo: Arc<dyn JobInfoRepository>,
    group_repo: Arc<dyn JobGroupRepository>,
    log_repo: Arc<dyn JobLogRepository>,
    client: Arc<dyn ExecutorClient>,
    routers: ExecutorRouteTable,
    /// 调度中心自身标识，写入调度备注便于集群排查
    instance_name: String,
}

impl TriggerExecutor {
    pub fn new(
        job_repo: Arc<dyn JobInfoRepository>,
        group_repo: Arc<dyn JobGroupRepository>,
        log_repo: Arc<dyn JobLogRepository>,
        client: Arc<dyn ExecutorClient>,
    ) -> Self {
        let routers = ExecutorRouteTable::new(client.clone());
        let instance_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            job_repo,
            group_repo,
            log_repo,
            client,
            routers,
            instance_name,
        }
    }

    /// 执行一次触发请求
    pub async fn trigger(&self, task: &TriggerTask) -> JobCenterResult<()> {
        let Some(mut job) = self.job_repo.load(task.job_id).await? else {
            warn!("触发失败，任务不存在: job_id={}", task.job_id);
            return Ok(());
        };

        if let Some(param) = &task.executor_param {
            job.executor_param = param.clone();
        }
        let fail_retry_count = if task.fail_retry_count >= 0 {
            task.fail_retry_count
        } else {
            job.executor_fail_retry_count
        };

        let Some(group) = self.group_repo.load(job.job_group).await? else {
            warn!(
                "触发失败，执行器组不存在: job_id={} group_id={}",
                job.id, job.job_group
            );
            return Ok(());
        };

        let addresses = group.registry_addresses();

        match task.sharding_param {
            // 失败重试回放原分片
            Some((index, total)) => {
                self.process_trigger(&group, &job, task.trigger_type, fail_retry_count, index, total)
                    .await?;
            }
            None if job.executor_route_strategy == RouteStrategy::ShardingBroadcast
                && !addresses.is_empty() =>
            {
                // 分片广播：对每个在线地址下发一片
                let total = addresses.len() as i32;
                for index in 0..total {
                    self.process_trigger(
                        &group,
                        &job,
                        task.trigger_type,
                        fail_retry_count,
                        index,
                        total,
                    )
                    .await?;
                }
            }
            None => {
                self.process_trigger(&group, &job, task.trigger_type, fail_retry_count, 0, 1)
                    .await?;
            }
        }

        Ok(())
    }

    /// 单次下发：日志先行，然后选址、RPC、回写结果
    async fn process_trigger(
        &self,
        group: &JobGroup,
        job: &JobInfo,
        trigger_type: TriggerType,
        fail_retry_count: i32,
        index: i32,
        total: i32,
    ) -> JobCenterResult<()> {
        let is_broadcast = job.executor_route_strategy == RouteStrategy::ShardingBroadcast;
        let sharding_param = if is_broadcast {
            Some(format!("{index}/{total}"))
        } else {
            None
        };

        // 日志记录在RPC调用之前创建，即使调用永远不返回也有据可查
        let mut log = JobLog::new(group.id, job.id, Utc::now());
        log.id = self.log_repo.create(&log).await?;

        let request = TriggerRequest {
            job_id: job.id,
            executor_handler: job.executor_handler.clone(),
            executor_params: job.executor_param.clone(),
            executor_block_strategy: job.executor_block_strategy.clone(),
            executor_timeout: job.executor_timeout,
            log_id: log.id,
            log_date_time: log
                .trigger_time
                .map(|t| t.timestamp_millis())
                .unwrap_or_default(),
            glue_type: "BEAN".to_string(),
            broadcast_index: index,
            broadcast_total: total,
        };

        let addresses = group.registry_addresses();

        // 选址：分片广播按下标取地址，其余交给路由器
        let (address, route_msg) = if is_broadcast {
            let address = addresses
                .get(index as usize)
                .or_else(|| addresses.first())
                .cloned();
            let msg = match &address {
                Some(a) => format!("分片 {index}/{total} => {a}"),
                None => "执行器地址列表为空".to_string(),
            };
            (address, msg)
        } else {
            let reply = self
                .routers
                .route(job.executor_route_strategy, job, &addresses)
                .await;
            let msg = reply.msg.clone().unwrap_or_default();
            (reply.content, msg)
        };

        // 下发
        let trigger_reply: RpcReply<String> = match &address {
            Some(address) => self.client.run(address, &request).await,
            None => RpcReply::fail("未找到可用的执行器地址"),
        };

        // 回写触发结果
        log.executor_address = address.clone();
        log.executor_handler = Some(job.executor_handler.clone());
        log.executor_param = Some(job.executor_param.clone());
        log.executor_sharding_param = sharding_param;
        log.executor_fail_retry_count = fail_retry_count;
        log.trigger_code = trigger_reply.code;
        log.trigger_msg = Some(self.build_trigger_msg(
            job,
            trigger_type,
            fail_retry_count,
            index,
            total,
            &route_msg,
            &trigger_reply,
        ));
        self.log_repo.update_trigger_info(&log).await?;

        let outcome = if trigger_reply.is_success() { "success" } else { "fail" };
        metrics::counter!("jobcenter_trigger_dispatched_total", "outcome" => outcome).increment(1);

        debug!(
            "任务下发完成: job_id={} log_id={} address={:?} code={}",
            job.id, log.id, address, trigger_reply.code
        );
        Ok(())
    }

    /// 组装调度备注，包含触发来源、选址过程与下发结果
    #[allow(clippy::too_many_arguments)]
    fn build_trigger_msg(
        &self,
        job: &JobInfo,
        trigger_type: TriggerType,
        fail_retry_count: i32,
        index: i32,
        total: i32,
        route_msg: &str,
        trigger_reply: &RpcReply<String>,
    ) -> String {
        let mut msg = format!(
            "触发类型: {}\n调度机器: {}\n执行器-路由策略: {}\n执行器-阻塞策略: {}\n任务超时: {}秒\n失败重试次数: {}",
            trigger_type.title(),
            self.instance_name,
            job.executor_route_strategy.as_str(),
            job.executor_block_strategy,
            job.executor_timeout,
            fail_retry_count,
        );
        if job.executor_route_strategy == RouteStrategy::ShardingBroadcast {
            msg.push_str(&format!("\n分片参数: {index}/{total}"));
        }
        if !route_msg.is_empty() {
            msg.push_str(&format!("\n路由过程: {route_msg}"));
        }
        msg.push_str(&format!(
            "\n触发结果: code={} msg={}",
            trigger_reply.code,
            trigger_reply.msg.as_deref().unwrap_or("")
        ));
        msg
    }
}

#[async_trait]
impl TriggerSink for TriggerExecutor {
    async fn submit(&self, task: TriggerTask) {
        if let Err(e) = self.trigger(&task).await {
            error!("触发执行异常: job_id={} error={}", task.job_id, e);
        }
    }
}
