use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::warn;

use jobcenter_core::{JobCenterError, JobCenterResult};
use jobcenter_domain::entities::{JobInfo, ScheduleType};

/// 根据任务的调度配置计算`from_millis`之后的下一次触发时间（毫秒时间戳）
///
/// `NONE`类型的任务不主动调度，返回`Ok(None)`。
pub fn generate_next_valid_time(
    job: &JobInfo,
    from_millis: i64,
) -> JobCenterResult<Option<i64>> {
    match job.schedule_type {
        ScheduleType::Cron => {
            let schedule =
                Schedule::from_str(&job.schedule_conf).map_err(|e| JobCenterError::InvalidCron {
                    expr: job.schedule_conf.clone(),
                    message: e.to_string(),
                })?;
            let from = DateTime::<Utc>::from_timestamp_millis(from_millis).ok_or_else(|| {
                JobCenterError::InvalidSchedule(format!("非法时间戳: {from_millis}"))
            })?;
            Ok(schedule.after(&from).next().map(|t| t.timestamp_millis()))
        }
        ScheduleType::FixRate => {
            let interval_seconds: i64 = job.schedule_conf.trim().parse().map_err(|_| {
                JobCenterError::InvalidSchedule(format!(
                    "固定间隔必须是正整数秒: {}",
                    job.schedule_conf
                ))
            })?;
            if interval_seconds <= 0 {
                return Err(JobCenterError::InvalidSchedule(format!(
                    "固定间隔必须是正整数秒: {}",
                    job.schedule_conf
                )));
            }
            Ok(Some(from_millis + interval_seconds * 1000))
        }
        ScheduleType::None => Ok(None),
    }
}

/// 刷新任务的下一次触发时间
///
/// 计算成功时把旧的`trigger_next_time`滚动到`trigger_last_time`；
/// 计算失败（配置损坏）或无下一次时间的任务直接停止，避免每轮扫描
/// 反复处理一条坏数据。
pub fn refresh_next_valid_time(job: &mut JobInfo, from_millis: i64) {
    match generate_next_valid_time(job, from_millis) {
        Ok(Some(next_time)) => {
            job.trigger_last_time = job.trigger_next_time;
            job.trigger_next_time = next_time;
        }
        Ok(None) => {
            job.mark_stopped();
            warn!(
                "任务 {} 无下一次有效触发时间，已停止调度: schedule_type={:?}",
                job.id, job.schedule_type
            );
        }
        Err(e) => {
            job.mark_stopped();
            warn!("任务 {} 调度配置无效，已停止调度: {}", job.id, e);
        }
    }
}
