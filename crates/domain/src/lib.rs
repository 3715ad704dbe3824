pub mod entities;
pub mod messages;
pub mod ports;
pub mod repositories;

pub use entities::{
    alarm_status, JobGroup, JobInfo, JobLog, MisfireStrategy, RegistryEntry, RouteStrategy,
    ScheduleType, TriggerType,
};
pub use messages::{
    HandleCallbackParam, RegistryParam, RpcReply, TriggerRequest, FAIL_CODE, SUCCESS_CODE,
};
pub use ports::{AlarmChannel, ExecutorClient, LockGuard, ScheduleLock};
pub use repositories::{
    JobGroupRepository, JobInfoRepository, JobLogRepository, JobRegistryRepository,
};
