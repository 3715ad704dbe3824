use async_trait::async_trait;

use jobcenter_core::JobCenterResult;
use jobcenter_domain::entities::{JobInfo, JobLog};
use jobcenter_domain::ports::AlarmChannel;

/// 写结构化日志的告警通道
///
/// 默认的兜底通道：把失败任务以error级别输出，交给日志采集
/// 侧做实际通知。邮件、钉钉等通道按同一个trait各自实现。
pub struct TracingAlarmChannel;

#[async_trait]
impl AlarmChannel for TracingAlarmChannel {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn send_alarm(&self, job: &JobInfo, log: &JobLog) -> JobCenterResult<()> {
        tracing::error!(
            job_id = job.id,
            job_desc = %job.job_desc,
            log_id = log.id,
            trigger_code = log.trigger_code,
            handle_code = log.handle_code,
            executor_address = log.executor_address.as_deref().unwrap_or(""),
            "任务执行失败告警"
        );
        Ok(())
    }
}
