//! 调度中心固定策略常量
//!
//! 这些值与执行器侧的心跳协议耦合，不暴露为可配置项。

/// 调度线程的预读窗口（毫秒），每次扫描查出当前时间+5秒内可执行的任务
pub const PRE_READ_MS: i64 = 5000;

/// 执行器心跳上报周期（秒），执行器每30秒重新注册一次
pub const BEAT_INTERVAL_SECONDS: i64 = 30;

/// 执行器死亡判定超时（秒），固定为3倍心跳周期
pub const DEAD_TIMEOUT_SECONDS: i64 = 90;

/// 回调处理结果消息的最大长度（字符），超出部分截断
pub const HANDLE_MSG_MAX_LEN: usize = 15000;

/// 自动注册的执行器组
pub const ADDRESS_TYPE_AUTO: i16 = 0;

/// 手动录入的执行器组
pub const ADDRESS_TYPE_MANUAL: i16 = 1;

/// 注册类型：执行器
pub const REGISTRY_GROUP_EXECUTOR: &str = "EXECUTOR";

/// 调度中心与执行器双向通信的访问令牌请求头
pub const ACCESS_TOKEN_HEADER: &str = "JOBCENTER-ACCESS-TOKEN";
