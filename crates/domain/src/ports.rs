use async_trait::async_trait;

use jobcenter_core::JobCenterResult;

use crate::entities::{JobInfo, JobLog};
use crate::messages::{RpcReply, TriggerRequest};

/// 执行器RPC客户端
///
/// 调度中心 -> 执行器的出站调用面。实现方负责把传输层故障
/// （连接拒绝、超时）折叠为失败应答，调用方不感知Err，
/// 失败应答统一落到调度日志后交给失败监控处理。
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// 存活探测
    async fn beat(&self, address: &str) -> RpcReply<String>;

    /// 空闲探测：询问指定任务在该执行器上是否空闲
    async fn idle_beat(&self, address: &str, job_id: i64) -> RpcReply<String>;

    /// 下发任务
    async fn run(&self, address: &str, request: &TriggerRequest) -> RpcReply<String>;

    /// 终止任务
    async fn kill(&self, address: &str, job_id: i64) -> RpcReply<String>;
}

/// 告警通道
///
/// 失败监控对每条认领的失败日志逐个调用所有通道，单个通道的
/// 失败不影响其他通道。
#[async_trait]
pub trait AlarmChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send_alarm(&self, job: &JobInfo, log: &JobLog) -> JobCenterResult<()>;
}

/// 集群互斥锁
///
/// 扫描线程每轮迭代通过该锁保证多个调度中心实例不会并发处理
/// 同一个扫描窗口。生产实现基于数据库行锁，测试替身用内存锁。
#[async_trait]
pub trait ScheduleLock: Send + Sync {
    /// 尝试获取锁，拿不到返回None（不是错误，本轮放弃即可）
    async fn try_acquire(&self, key: &str) -> JobCenterResult<Option<Box<dyn LockGuard>>>;
}

/// 锁的持有凭据，release提交/释放底层资源
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>) -> JobCenterResult<()>;
}
