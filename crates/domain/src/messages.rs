use serde::{Deserialize, Serialize};

/// 远程调用成功码
pub const SUCCESS_CODE: i32 = 200;
/// 远程调用失败码
pub const FAIL_CODE: i32 = 500;

/// 统一的RPC应答信封
///
/// 调度中心与执行器双向通信都使用`{code, msg, content}`结构，
/// 200表示成功，500表示失败。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReply<T> {
    pub code: i32,
    pub msg: Option<String>,
    pub content: Option<T>,
}

impl<T> RpcReply<T> {
    pub fn success(content: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            msg: None,
            content: Some(content),
        }
    }

    pub fn success_empty() -> Self {
        Self {
            code: SUCCESS_CODE,
            msg: None,
            content: None,
        }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self {
            code: FAIL_CODE,
            msg: Some(msg.into()),
            content: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// 任务触发请求，调度中心 -> 执行器
///
/// 执行器根据`executor_handler`定位业务方法，`log_id`用于之后的
/// 结果回调，分片参数供广播任务切分数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_id: i64,
    pub executor_handler: String,
    pub executor_params: String,
    pub executor_block_strategy: String,
    /// 任务超时（秒），0表示不限制
    pub executor_timeout: i32,
    pub log_id: i64,
    /// 日志创建时间（毫秒时间戳）
    pub log_date_time: i64,
    /// 执行模式元数据，目前固定为BEAN
    pub glue_type: String,
    pub broadcast_index: i32,
    pub broadcast_total: i32,
}

/// 执行结果回调参数，执行器 -> 调度中心
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleCallbackParam {
    pub log_id: i64,
    pub log_date_time: i64,
    pub handle_code: i32,
    pub handle_msg: Option<String>,
}

/// 注册/摘除请求，执行器 -> 调度中心
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryParam {
    pub registry_group: String,
    pub registry_key: String,
    pub registry_value: String,
}

impl RegistryParam {
    /// 三元组是否完整，残缺的注册请求直接拒绝
    pub fn is_valid(&self) -> bool {
        !self.registry_group.trim().is_empty()
            && !self.registry_key.trim().is_empty()
            && !self.registry_value.trim().is_empty()
    }
}
