use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{JobCenterError, JobCenterResult};

/// 快线程池的最大并发下限，配置低于该值时强制抬升
pub const TRIGGER_POOL_FAST_FLOOR: usize = 200;

/// 慢线程池的最大并发下限
pub const TRIGGER_POOL_SLOW_FLOOR: usize = 100;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub trigger_pool: TriggerPoolConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// API监听地址
    pub bind_address: String,
    /// 执行器回调接口的共享访问令牌，为空表示不校验
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

/// 快慢触发线程池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerPoolConfig {
    pub fast_max: usize,
    pub slow_max: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 调度日志保留天数，小于7时不做清理
    pub retention_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            access_token: String::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/jobcenter".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

impl Default for TriggerPoolConfig {
    fn default() -> Self {
        Self {
            fast_max: TRIGGER_POOL_FAST_FLOOR,
            slow_max: TRIGGER_POOL_SLOW_FLOOR,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            trigger_pool: TriggerPoolConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置：TOML文件 + 环境变量覆盖
    ///
    /// 文件不存在时使用默认配置，环境变量`JOBCENTER_DATABASE_URL`、
    /// `JOBCENTER_ACCESS_TOKEN`优先级最高。
    pub fn load(config_path: Option<&str>) -> JobCenterResult<Self> {
        let mut config = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    JobCenterError::Configuration(format!("读取配置文件失败: {e}"))
                })?;
                toml::from_str(&content).map_err(|e| {
                    JobCenterError::Configuration(format!("TOML解析失败: {e}"))
                })?
            }
            Some(path) => {
                warn!("配置文件 {} 不存在，使用默认配置", path);
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        if let Ok(url) = std::env::var("JOBCENTER_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(token) = std::env::var("JOBCENTER_ACCESS_TOKEN") {
            config.server.access_token = token;
        }

        config.validate()?;
        Ok(config)
    }

    /// 校验配置并对线程池上限做下限保护
    pub fn validate(&mut self) -> JobCenterResult<()> {
        if self.server.bind_address.is_empty() {
            return Err(JobCenterError::Configuration(
                "server.bind_address 不能为空".to_string(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(JobCenterError::Configuration(
                "database.url 不能为空".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(JobCenterError::Configuration(
                "database.max_connections 必须大于0".to_string(),
            ));
        }

        if self.trigger_pool.fast_max < TRIGGER_POOL_FAST_FLOOR {
            warn!(
                "trigger_pool.fast_max = {} 低于下限，已调整为 {}",
                self.trigger_pool.fast_max, TRIGGER_POOL_FAST_FLOOR
            );
            self.trigger_pool.fast_max = TRIGGER_POOL_FAST_FLOOR;
        }
        if self.trigger_pool.slow_max < TRIGGER_POOL_SLOW_FLOOR {
            warn!(
                "trigger_pool.slow_max = {} 低于下限，已调整为 {}",
                self.trigger_pool.slow_max, TRIGGER_POOL_SLOW_FLOOR
            );
            self.trigger_pool.slow_max = TRIGGER_POOL_SLOW_FLOOR;
        }

        Ok(())
    }

    /// 日志清理是否启用
    pub fn log_retention_enabled(&self) -> bool {
        self.log.retention_days >= 7
    }
}
