//! 基础设施实现：PostgreSQL仓储、执行器HTTP客户端、告警通道。

pub mod alarm;
pub mod database;
pub mod executor_rpc;

pub use alarm::TracingAlarmChannel;
pub use database::create_pool;
pub use database::postgres::{
    PostgresJobGroupRepository, PostgresJobLogRepository, PostgresJobRepository,
    PostgresRegistryRepository, PostgresScheduleLock,
};
pub use executor_rpc::HttpExecutorClient;
