use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use jobcenter_domain::entities::{JobInfo, RouteStrategy};
use jobcenter_domain::messages::RpcReply;
use jobcenter_domain::ports::ExecutorClient;

/// 一致性哈希每个真实地址的虚拟节点数
const VIRTUAL_NODE_COUNT: u32 = 100;

/// 执行器路由器
///
/// 输入候选地址列表（来自执行器组的在线地址），输出选中的地址。
/// 应答沿用RPC信封：成功时`content`为地址，`msg`可携带探测过程的
/// 诊断信息；失败时只有诊断信息。路由失败由触发器落入调度日志，
/// 不会向上抛出。
#[async_trait]
pub trait ExecutorRouter: Send + Sync {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String>;
}

/// 固定选择第一个地址
pub struct FirstRouter;

#[async_trait]
impl ExecutorRouter for FirstRouter {
    async fn route(&self, _job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        RpcReply::success(addresses[0].clone())
    }
}

/// 固定选择最后一个地址
pub struct LastRouter;

#[async_trait]
impl ExecutorRouter for LastRouter {
    async fn route(&self, _job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        RpcReply::success(addresses[addresses.len() - 1].clone())
    }
}

/// 随机选择
pub struct RandomRouter;

#[async_trait]
impl ExecutorRouter for RandomRouter {
    async fn route(&self, _job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let index = rand::rng().random_range(0..addresses.len());
        RpcReply::success(addresses[index].clone())
    }
}

/// 轮询选择
///
/// 按任务维护独立计数器，初值取0~99的随机数，避免大量任务在
/// 同一时刻都从第一个地址开始。计数缓存按天整体重置，防止
/// 长期运行后的无界增长。
pub struct RoundRouter {
    state: Mutex<RoundState>,
}

struct RoundState {
    cache_day: i64,
    counters: HashMap<i64, u64>,
}

impl RoundRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RoundState {
                cache_day: current_day(),
                counters: HashMap::new(),
            }),
        }
    }
}

impl Default for RoundRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouter for RoundRouter {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut state = self.state.lock().await;
        let today = current_day();
        if state.cache_day != today {
            state.cache_day = today;
            state.counters.clear();
        }

        let count = state
            .counters
            .entry(job.id)
            .or_insert_with(|| rand::rng().random_range(0..100));
        let address = addresses[(*count as usize) % addresses.len()].clone();
        *count += 1;
        RpcReply::success(address)
    }
}

/// 一致性哈希选择
///
/// 每个地址展开为100个虚拟节点放到哈希环上，任务按自身ID哈希
/// 落点，取环上顺时针第一个节点。同一任务在地址列表不变时总是
/// 落到同一地址，地址增减时只迁移相邻区间。
pub struct ConsistentHashRouter;

impl ConsistentHashRouter {
    /// md5摘要低4字节按小端组成无符号哈希值
    fn hash(input: &str) -> u32 {
        let digest = md5::compute(input.as_bytes());
        ((digest[3] as u32) << 24)
            | ((digest[2] as u32) << 16)
            | ((digest[1] as u32) << 8)
            | (digest[0] as u32)
    }
}

#[async_trait]
impl ExecutorRouter for ConsistentHashRouter {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut ring: BTreeMap<u32, &String> = BTreeMap::new();
        for address in addresses {
            for i in 0..VIRTUAL_NODE_COUNT {
                let node_key = format!("SHARD-{address}-NODE-{i}");
                ring.insert(Self::hash(&node_key), address);
            }
        }

        let job_hash = Self::hash(&job.id.to_string());
        // 顺时针第一个节点，越过末尾则回绕到环首
        let selected = ring
            .range(job_hash..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, address)| (*address).clone());

        match selected {
            Some(address) => RpcReply::success(address),
            None => RpcReply::fail("哈希环为空"),
        }
    }
}

/// 最不经常使用
///
/// 按任务维护每个地址的使用次数，选计数最小者（并列时取候选
/// 列表中靠前的）。下线地址的计数随候选列表同步剔除，计数缓存
/// 按天重置。
pub struct LfuRouter {
    state: Mutex<UsageState>,
}

/// 最近最久未使用
///
/// 按任务维护每个地址最近一次被选中的序号，优先选从未使用过的
/// 地址，其次选序号最小（最久未用）的。
pub struct LruRouter {
    state: Mutex<UsageState>,
}

struct UsageState {
    cache_day: i64,
    /// job_id -> (address -> 使用计数或最近使用序号)
    usage: HashMap<i64, HashMap<String, u64>>,
    /// LRU的全局单调序号
    sequence: u64,
}

impl UsageState {
    fn new() -> Self {
        Self {
            cache_day: current_day(),
            usage: HashMap::new(),
            sequence: 0,
        }
    }

    fn rollover(&mut self) {
        let today = current_day();
        if self.cache_day != today {
            self.cache_day = today;
            self.usage.clear();
            self.sequence = 0;
        }
    }

    /// 与候选列表对齐：剔除已下线地址
    fn sync_candidates(job_usage: &mut HashMap<String, u64>, addresses: &[String]) {
        job_usage.retain(|address, _| addresses.contains(address));
    }
}

impl LfuRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UsageState::new()),
        }
    }
}

impl Default for LfuRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouter for LfuRouter {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut state = self.state.lock().await;
        state.rollover();

        let job_usage = state.usage.entry(job.id).or_default();
        UsageState::sync_candidates(job_usage, addresses);

        let mut selected = &addresses[0];
        let mut min_count = u64::MAX;
        for address in addresses {
            let count = job_usage.get(address).copied().unwrap_or(0);
            if count < min_count {
                min_count = count;
                selected = address;
            }
        }

        let selected = selected.clone();
        *job_usage.entry(selected.clone()).or_insert(0) += 1;
        RpcReply::success(selected)
    }
}

impl LruRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UsageState::new()),
        }
    }
}

impl Default for LruRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorRouter for LruRouter {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut state = self.state.lock().await;
        state.rollover();
        state.sequence += 1;
        let sequence = state.sequence;

        let job_usage = state.usage.entry(job.id).or_default();
        UsageState::sync_candidates(job_usage, addresses);

        // 从未使用过的地址优先，其次取最久未用的
        let mut selected: Option<&String> = None;
        let mut min_seq = u64::MAX;
        for address in addresses {
            match job_usage.get(address) {
                None => {
                    selected = Some(address);
                    break;
                }
                Some(seq) if *seq < min_seq => {
                    min_seq = *seq;
                    selected = Some(address);
                }
                Some(_) => {}
            }
        }

        match selected.cloned() {
            Some(address) => {
                job_usage.insert(address.clone(), sequence);
                RpcReply::success(address)
            }
            None => RpcReply::fail("候选地址为空"),
        }
    }
}

/// 故障转移
///
/// 按顺序对每个地址做心跳探测，返回第一个探活成功的地址。
/// 探测过程作为诊断信息放在应答`msg`中，方便从调度日志排查
/// 哪些地址挂了。
pub struct FailoverRouter {
    client: Arc<dyn ExecutorClient>,
}

impl FailoverRouter {
    pub fn new(client: Arc<dyn ExecutorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutorRouter for FailoverRouter {
    async fn route(&self, _job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut diagnostics = String::new();
        for address in addresses {
            let reply = self.client.beat(address).await;
            diagnostics.push_str(&format!(
                "心跳检测 {} => code={} msg={}\n",
                address,
                reply.code,
                reply.msg.as_deref().unwrap_or("")
            ));
            if reply.is_success() {
                return RpcReply {
                    code: jobcenter_domain::messages::SUCCESS_CODE,
                    msg: Some(diagnostics),
                    content: Some(address.clone()),
                };
            }
        }
        RpcReply::fail(format!("所有执行器心跳检测均失败\n{diagnostics}"))
    }
}

/// 忙碌转移
///
/// 按顺序询问各执行器指定任务是否空闲，返回第一个空闲的地址。
pub struct BusyoverRouter {
    client: Arc<dyn ExecutorClient>,
}

impl BusyoverRouter {
    pub fn new(client: Arc<dyn ExecutorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecutorRouter for BusyoverRouter {
    async fn route(&self, job: &JobInfo, addresses: &[String]) -> RpcReply<String> {
        let mut diagnostics = String::new();
        for address in addresses {
            let reply = self.client.idle_beat(address, job.id).await;
            diagnostics.push_str(&format!(
                "空闲检测 {} => code={} msg={}\n",
                address,
                reply.code,
                reply.msg.as_deref().unwrap_or("")
            ));
            if reply.is_success() {
                return RpcReply {
                    code: jobcenter_domain::messages::SUCCESS_CODE,
                    msg: Some(diagnostics),
                    content: Some(address.clone()),
                };
            }
        }
        RpcReply::fail(format!("所有执行器均忙碌\n{diagnostics}"))
    }
}

/// 路由器表
///
/// 有状态的路由器（轮询、LFU、LRU）全局只有一份，保证计数跨
/// 触发累积。分片广播不在表内，由触发器结构化展开。
pub struct ExecutorRouteTable {
    first: FirstRouter,
    last: LastRouter,
    round: RoundRouter,
    random: RandomRouter,
    consistent_hash: ConsistentHashRouter,
    lfu: LfuRouter,
    lru: LruRouter,
    failover: FailoverRouter,
    busyover: BusyoverRouter,
}

impl ExecutorRouteTable {
    pub fn new(client: Arc<dyn ExecutorClient>) -> Self {
        Self {
            first: FirstRouter,
            last: LastRouter,
            round: RoundRouter::new(),
            random: RandomRouter,
            consistent_hash: ConsistentHashRouter,
            lfu: LfuRouter::new(),
            lru: LruRouter::new(),
            failover: FailoverRouter::new(client.clone()),
            busyover: BusyoverRouter::new(client),
        }
    }

    /// 按策略选择地址，候选列表为空时直接返回失败
    pub async fn route(
        &self,
        strategy: RouteStrategy,
        job: &JobInfo,
        addresses: &[String],
    ) -> RpcReply<String> {
        if addresses.is_empty() {
            return RpcReply::fail("执行器地址列表为空");
        }
        match strategy {
            RouteStrategy::First => self.first.route(job, addresses).await,
            RouteStrategy::Last => self.last.route(job, addresses).await,
            RouteStrategy::Round => self.round.route(job, addresses).await,
            RouteStrategy::Random => self.random.route(job, addresses).await,
            RouteStrategy::ConsistentHash => self.consistent_hash.route(job, addresses).await,
            RouteStrategy::LeastFrequentlyUsed => self.lfu.route(job, addresses).await,
            RouteStrategy::LeastRecentlyUsed => self.lru.route(job, addresses).await,
            RouteStrategy::Failover => self.failover.route(job, addresses).await,
            RouteStrategy::Busyover => self.busyover.route(job, addresses).await,
            // 分片广播是结构性策略，不做单地址选择
            RouteStrategy::ShardingBroadcast => {
                RpcReply::fail("分片广播不支持单地址路由")
            }
        }
    }
}

fn current_day() -> i64 {
    chrono::Utc::now().timestamp() / 86_400
}
