//! 调度引擎：扫描循环、时间轮、快慢触发池、路由策略，以及
//! 注册、完成回调、失败监控、日志清理等配套后台服务。

pub mod complete;
pub mod cron_utils;
pub mod fail_monitor;
pub mod log_retention;
pub mod registry;
pub mod schedule;
pub mod strategies;
pub mod trigger;
pub mod trigger_pool;

#[cfg(test)]
pub mod test_utils;

pub use complete::CompleteService;
pub use fail_monitor::FailMonitor;
pub use log_retention::LogRetentionService;
pub use registry::RegistryService;
pub use schedule::ScheduleService;
pub use trigger::TriggerExecutor;
pub use trigger_pool::{TriggerPool, TriggerSink, TriggerTask};
