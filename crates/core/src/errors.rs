use thiserror::Error;

/// 调度中心错误类型定义
#[derive(Debug, Error)]
pub enum JobCenterError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("执行器组未找到: {id}")]
    JobGroupNotFound { id: i64 },

    #[error("调度日志未找到: {id}")]
    JobLogNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),

    #[error("远程调用错误: {0}")]
    Rpc(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type JobCenterResult<T> = std::result::Result<T, JobCenterError>;
