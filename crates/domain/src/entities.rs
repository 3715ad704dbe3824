use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务定义
///
/// 调度中心管理的一条定时任务，包含调度配置、路由配置和触发状态。
/// 调度线程只修改触发相关字段（`trigger_status`、`trigger_last_time`、
/// `trigger_next_time`），其余字段由管理侧CRUD维护。
///
/// 不变式：处于运行状态的任务，`trigger_next_time`在相邻两次扫描之间
/// 单调不减；停止状态的任务两个触发时间都为0。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobInfo {
    pub id: i64,
    /// 所属执行器组ID
    pub job_group: i64,
    pub job_desc: String,
    pub author: String,
    /// 调度类型：NONE / CRON / FIX_RATE
    pub schedule_type: ScheduleType,
    /// 调度配置，CRON表达式或固定间隔秒数
    pub schedule_conf: String,
    /// 调度过期策略
    pub misfire_strategy: MisfireStrategy,
    /// 路由策略
    pub executor_route_strategy: RouteStrategy,
    /// 阻塞策略，由执行器侧解释执行，调度中心透传
    pub executor_block_strategy: String,
    pub executor_handler: String,
    pub executor_param: String,
    /// 任务执行超时（秒），0表示不限制
    pub executor_timeout: i32,
    pub executor_fail_retry_count: i32,
    /// 子任务ID列表，逗号分隔
    pub child_job_id: String,
    /// 触发状态：0-停止，1-运行
    pub trigger_status: i16,
    /// 上次触发时间（毫秒时间戳），0表示从未触发
    pub trigger_last_time: i64,
    /// 下次触发时间（毫秒时间戳），0表示已停止
    pub trigger_next_time: i64,
    pub add_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl JobInfo {
    /// 任务是否处于运行状态
    pub fn is_running(&self) -> bool {
        self.trigger_status == 1
    }

    /// 停止任务并清零触发时间
    pub fn mark_stopped(&mut self) {
        self.trigger_status = 0;
        self.trigger_last_time = 0;
        self.trigger_next_time = 0;
    }

    /// 解析子任务ID列表，忽略空白和非数字片段
    pub fn child_job_ids(&self) -> Vec<i64> {
        self.child_job_id
            .split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .collect()
    }
}

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleType {
    /// 不主动调度，仅手动/API触发
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "CRON")]
    Cron,
    /// 固定间隔（秒）
    #[serde(rename = "FIX_RATE")]
    FixRate,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::None => "NONE",
            ScheduleType::Cron => "CRON",
            ScheduleType::FixRate => "FIX_RATE",
        }
    }
}

/// 调度过期策略
///
/// 任务的触发时间已经超过一个扫描窗口仍未被处理时的补偿方式。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MisfireStrategy {
    /// 忽略本次触发，直接计算下一次
    #[serde(rename = "DO_NOTHING")]
    DoNothing,
    /// 立即补偿触发一次
    #[serde(rename = "FIRE_ONCE_NOW")]
    FireOnceNow,
}

impl MisfireStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MisfireStrategy::DoNothing => "DO_NOTHING",
            MisfireStrategy::FireOnceNow => "FIRE_ONCE_NOW",
        }
    }
}

/// 路由策略
///
/// 除`ShardingBroadcast`外都对应一个地址选择器实现；分片广播是结构性
/// 策略，由触发器按地址列表逐个下发，不经过路由器。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RouteStrategy {
    #[serde(rename = "FIRST")]
    First,
    #[serde(rename = "LAST")]
    Last,
    #[serde(rename = "ROUND")]
    Round,
    #[serde(rename = "RANDOM")]
    Random,
    #[serde(rename = "CONSISTENT_HASH")]
    ConsistentHash,
    #[serde(rename = "LEAST_FREQUENTLY_USED")]
    LeastFrequentlyUsed,
    #[serde(rename = "LEAST_RECENTLY_USED")]
    LeastRecentlyUsed,
    #[serde(rename = "FAILOVER")]
    Failover,
    #[serde(rename = "BUSYOVER")]
    Busyover,
    #[serde(rename = "SHARDING_BROADCAST")]
    ShardingBroadcast,
}

impl RouteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStrategy::First => "FIRST",
            RouteStrategy::Last => "LAST",
            RouteStrategy::Round => "ROUND",
            RouteStrategy::Random => "RANDOM",
            RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
            RouteStrategy::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            RouteStrategy::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            RouteStrategy::Failover => "FAILOVER",
            RouteStrategy::Busyover => "BUSYOVER",
            RouteStrategy::ShardingBroadcast => "SHARDING_BROADCAST",
        }
    }
}

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    Manual,
    Cron,
    Retry,
    Parent,
    Api,
    Misfire,
}

impl TriggerType {
    /// 触发来源的展示名称，写入调度备注
    pub fn title(&self) -> &'static str {
        match self {
            TriggerType::Manual => "手动触发",
            TriggerType::Cron => "Cron触发",
            TriggerType::Retry => "失败重试触发",
            TriggerType::Parent => "父任务触发",
            TriggerType::Api => "API触发",
            TriggerType::Misfire => "调度过期补偿触发",
        }
    }
}

/// 执行器组
///
/// 一组可互换的执行器地址，按`app_name`聚合。自动注册的组
/// （`address_type = 0`）的地址列表由注册服务的后台清理线程维护。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobGroup {
    pub id: i64,
    /// 执行器应用标识，注册时的group key
    pub app_name: String,
    pub title: String,
    /// 0-自动注册，1-手动录入
    pub address_type: i16,
    /// 逗号分隔的在线地址列表，无在线地址时为None
    pub address_list: Option<String>,
    pub update_time: DateTime<Utc>,
}

impl JobGroup {
    /// 解析出当前在线的执行器地址列表
    pub fn registry_addresses(&self) -> Vec<String> {
        self.address_list
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .collect()
    }
}

/// 执行器注册记录
///
/// 由执行器心跳创建/续期，过期由注册服务清理。非权威任务状态，
/// 只反映最近一次心跳。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistryEntry {
    pub id: i64,
    /// 注册类型，执行器固定为EXECUTOR
    pub registry_group: String,
    /// 执行器应用标识
    pub registry_key: String,
    /// 执行器地址
    pub registry_value: String,
    /// 最近一次心跳时间
    pub update_time: DateTime<Utc>,
}

/// 调度日志
///
/// 每次下发尝试一行（不是每个任务一行）。记录在RPC调用之前创建，
/// 保证即使调用永远不返回也有据可查。触发结果在下发时同步写入，
/// 处理结果由回调或丢失检测异步补全。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobLog {
    pub id: i64,
    pub job_group: i64,
    pub job_id: i64,
    /// 本次选中的执行器地址
    pub executor_address: Option<String>,
    pub executor_handler: Option<String>,
    pub executor_param: Option<String>,
    /// 分片参数，格式 "index/total"
    pub executor_sharding_param: Option<String>,
    pub executor_fail_retry_count: i32,
    pub trigger_time: Option<DateTime<Utc>>,
    /// 触发结果码，0表示尚未触发
    pub trigger_code: i32,
    pub trigger_msg: Option<String>,
    pub handle_time: Option<DateTime<Utc>>,
    /// 处理结果码，0表示尚未收到回调
    pub handle_code: i32,
    pub handle_msg: Option<String>,
    /// 告警状态，见[`alarm_status`]
    pub alarm_status: i16,
}

impl JobLog {
    /// 构造一条新的调度日志，只含创建时即可确定的字段
    pub fn new(job_group: i64, job_id: i64, trigger_time: DateTime<Utc>) -> Self {
        Self {
            id: 0, // 将由数据库生成
            job_group,
            job_id,
            executor_address: None,
            executor_handler: None,
            executor_param: None,
            executor_sharding_param: None,
            executor_fail_retry_count: 0,
            trigger_time: Some(trigger_time),
            trigger_code: 0,
            trigger_msg: None,
            handle_time: None,
            handle_code: 0,
            handle_msg: None,
            alarm_status: alarm_status::UNSET,
        }
    }
}

/// 告警状态常量
///
/// 调度中心集群通过CAS抢占`UNSET -> LOCKED`来保证同一条失败日志
/// 只被一个实例告警。
pub mod alarm_status {
    pub const LOCKED: i16 = -1;
    pub const UNSET: i16 = 0;
    pub const NOT_NEEDED: i16 = 1;
    pub const SUCCEEDED: i16 = 2;
    pub const FAILED: i16 = 3;
}

// ---------------------- sqlx 映射 ----------------------

macro_rules! impl_varchar_enum {
    ($ty:ty, { $($variant:path => $text:literal),+ $(,)? }) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                match s {
                    $($text => Ok($variant),)+
                    _ => Err(format!("invalid enum value: {s}").into()),
                }
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }
    };
}

impl_varchar_enum!(ScheduleType, {
    ScheduleType::None => "NONE",
    ScheduleType::Cron => "CRON",
    ScheduleType::FixRate => "FIX_RATE",
});

impl_varchar_enum!(MisfireStrategy, {
    MisfireStrategy::DoNothing => "DO_NOTHING",
    MisfireStrategy::FireOnceNow => "FIRE_ONCE_NOW",
});

impl_varchar_enum!(RouteStrategy, {
    RouteStrategy::First => "FIRST",
    RouteStrategy::Last => "LAST",
    RouteStrategy::Round => "ROUND",
    RouteStrategy::Random => "RANDOM",
    RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
    RouteStrategy::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
    RouteStrategy::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
    RouteStrategy::Failover => "FAILOVER",
    RouteStrategy::Busyover => "BUSYOVER",
    RouteStrategy::ShardingBroadcast => "SHARDING_BROADCAST",
});
