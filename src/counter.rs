//! 用量计数存储与写合并缓存
//!
//! 持久化写入是这套网关的主要成本来源，因此热路径上绝不同步写库：
//! 递增先记入进程本地缓冲，由定时器（默认5秒）或缓冲条数阈值（默认
//! 50）触发批量落库，以先到者为准。读取先查60秒级的本地只读缓存，
//! 吸收单个滥用客户端的突发流量。
//!
//! 这是以严格精度换成本的设计：客户端可以在批量窗口与缓存TTL决定的
//! 有界范围内短暂超限，属接受的折衷而非缺陷。缓冲与批量落库属于进程
//! 生命周期，不随触发它的请求结束而取消。

use crate::error::StorageError;
use crate::storage::Storage;
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// 默认批量落库间隔（5秒）
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// 默认缓冲条数阈值，超过立即落库
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// 默认读缓存TTL（60秒）
pub const DEFAULT_READ_TTL_SECS: u64 = 60;

/// 默认读缓存身份条目上限
pub const DEFAULT_MAX_CACHED_IDENTITIES: usize = 10_000;

/// 批量落库写入的TTL（2小时），只用于缓冲清理
///
/// 窗口语义由键中的桶标签决定，与这个TTL无关。
pub const DEFAULT_WRITE_TTL_SECS: u64 = 2 * 3600;

/// 超出上限时淘汰的比例（按最后更新时间最旧的20%）
const EVICTION_FRACTION: f64 = 0.2;

/// 计数器存储接口
///
/// 每个计数器键自动过期；计数只增不减。
#[async_trait]
pub trait CounterStorage: Send + Sync {
    /// 递增并返回新值
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StorageError>;

    /// 批量读取，缺失的键返回0
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, u64>, StorageError>;

    /// 覆盖写入最新值
    async fn put(&self, key: &str, value: u64, ttl_secs: u64) -> Result<(), StorageError>;
}

/// 键值存储上的计数器适配
///
/// 计数以十进制字符串落库；解析失败按0处理（等同缺失）。
pub struct KvCounterStore {
    storage: Arc<dyn Storage>,
}

impl KvCounterStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CounterStorage for KvCounterStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StorageError> {
        // 读-改-写；并发竞争可能少计一次，属接受的弱一致折衷
        let current = self
            .storage
            .get(key)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        self.storage
            .set(key, &next.to_string(), Some(ttl_secs))
            .await?;
        Ok(next)
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, u64>, StorageError> {
        let mut counts = HashMap::new();
        for key in keys {
            let value = self
                .storage
                .get(key)
                .await?
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            counts.insert(key.clone(), value);
        }
        Ok(counts)
    }

    async fn put(&self, key: &str, value: u64, ttl_secs: u64) -> Result<(), StorageError> {
        self.storage
            .set(key, &value.to_string(), Some(ttl_secs))
            .await
    }
}

/// 写合并配置
#[derive(Debug, Clone)]
pub struct CoalescingConfig {
    /// 批量落库间隔
    pub flush_interval: Duration,
    /// 缓冲条数阈值
    pub flush_threshold: usize,
    /// 读缓存TTL
    pub read_ttl: Duration,
    /// 读缓存身份条目上限
    pub max_cached_identities: usize,
    /// 落库写入TTL（秒）
    pub write_ttl_secs: u64,
}

impl Default for CoalescingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            read_ttl: Duration::from_secs(DEFAULT_READ_TTL_SECS),
            max_cached_identities: DEFAULT_MAX_CACHED_IDENTITIES,
            write_ttl_secs: DEFAULT_WRITE_TTL_SECS,
        }
    }
}

impl CoalescingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn read_ttl(mut self, ttl: Duration) -> Self {
        self.read_ttl = ttl;
        self
    }

    pub fn max_cached_identities(mut self, max: usize) -> Self {
        self.max_cached_identities = max;
        self
    }
}

/// 计数器缓存统计
#[derive(Debug, Default)]
pub struct CounterStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    buffered_increments: AtomicU64,
    flushes: AtomicU64,
    flushed_keys: AtomicU64,
    flush_failures: AtomicU64,
    evictions: AtomicU64,
}

impl CounterStats {
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn buffered_increments(&self) -> u64 {
        self.buffered_increments.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn flushed_keys(&self) -> u64 {
        self.flushed_keys.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// 按身份的读缓存条目
struct IdentityCounts {
    /// 存储键 -> 计数
    counts: HashMap<String, u64>,
    /// 从持久层取回的时间
    fetched_at: Instant,
    /// 最后更新时间（淘汰依据）
    last_updated: Instant,
}

/// 待落库的最新值
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    value: u64,
}

struct CounterInner {
    store: KvCounterStore,
    config: CoalescingConfig,
    /// 待落库缓冲：存储键 -> 最新值
    pending: dashmap::DashMap<String, PendingWrite>,
    /// 读缓存：身份 -> 计数快照
    read_cache: dashmap::DashMap<String, IdentityCounts>,
    stats: CounterStats,
}

impl CounterInner {
    /// 批量落库：写出每个缓冲键的最新值
    async fn flush(&self) -> usize {
        let drained: Vec<(String, PendingWrite)> = {
            let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
            keys.into_iter()
                .filter_map(|k| self.pending.remove(&k))
                .collect()
        };

        if drained.is_empty() {
            return 0;
        }

        let mut written = 0;
        for (key, write) in &drained {
            match self
                .store
                .put(key, write.value, self.config.write_ttl_secs)
                .await
            {
                Ok(()) => written += 1,
                Err(e) => {
                    // 丢一次计数好过阻塞调用方
                    self.stats.flush_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("计数落库失败 key={}: {}", key, e);
                }
            }
        }

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .flushed_keys
            .fetch_add(written as u64, Ordering::Relaxed);
        debug!("批量落库完成: {}/{} 键", written, drained.len());
        written
    }

    /// 淘汰最旧的一批身份条目
    fn evict_oldest(&self) {
        let over = self
            .read_cache
            .len()
            .saturating_sub(self.config.max_cached_identities);
        if over == 0 {
            return;
        }

        let evict_count = ((self.config.max_cached_identities as f64 * EVICTION_FRACTION) as usize)
            .max(over);

        let mut entries: Vec<(String, Instant)> = self
            .read_cache
            .iter()
            .map(|e| (e.key().clone(), e.value().last_updated))
            .collect();
        entries.sort_by_key(|(_, t)| *t);

        for (identity, _) in entries.into_iter().take(evict_count) {
            self.read_cache.remove(&identity);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        trace!("读缓存淘汰 {} 个身份", evict_count);
    }
}

/// 写合并计数器
///
/// 显式构造、依赖注入的进程级组件，自带生命周期管理；测试可以各建
/// 各的实例互不影响。
pub struct CoalescingCounter {
    inner: Arc<CounterInner>,
    flush_handle: Option<JoinHandle<()>>,
}

impl CoalescingCounter {
    /// 创建计数器并启动批量落库任务
    pub fn new(storage: Arc<dyn Storage>, config: CoalescingConfig) -> Self {
        let inner = Arc::new(CounterInner {
            store: KvCounterStore::new(storage),
            config,
            pending: dashmap::DashMap::new(),
            read_cache: dashmap::DashMap::new(),
            stats: CounterStats::default(),
        });

        let flush_handle = Self::start_flush_task(Arc::clone(&inner));

        Self {
            inner,
            flush_handle: Some(flush_handle),
        }
    }

    /// 启动批量落库任务
    ///
    /// 缓冲属于进程而非单个请求：触发请求返回后落库照常进行。
    fn start_flush_task(inner: Arc<CounterInner>) -> JoinHandle<()> {
        let interval = inner.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.flush().await;
            }
        })
    }

    /// 读取一组计数器的当前值
    ///
    /// 60秒内的缓存快照直接命中；缺键或过期则回源，并叠加缓冲中尚未
    /// 落库的最新值。缺失的键返回0。
    pub async fn get_counts(
        &self,
        identity: &str,
        keys: &[String],
    ) -> Result<HashMap<String, u64>, StorageError> {
        if let Some(entry) = self.inner.read_cache.get(identity) {
            let fresh = entry.fetched_at.elapsed() < self.inner.config.read_ttl;
            let complete = keys.iter().all(|k| entry.counts.contains_key(k));
            if fresh && complete {
                self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                let mut result = HashMap::new();
                for key in keys {
                    result.insert(key.clone(), *entry.counts.get(key).unwrap_or(&0));
                }
                return Ok(result);
            }
        }

        self.inner
            .stats
            .cache_misses
            .fetch_add(1, Ordering::Relaxed);

        let mut counts = self.inner.store.get_many(keys).await?;

        // 缓冲里可能有更新的值（已递增未落库）
        for key in keys {
            if let Some(pending) = self.inner.pending.get(key.as_str()) {
                let entry = counts.entry(key.clone()).or_insert(0);
                *entry = (*entry).max(pending.value);
            }
        }

        let now = Instant::now();
        self.inner.read_cache.insert(
            identity.to_string(),
            IdentityCounts {
                counts: counts.clone(),
                fetched_at: now,
                last_updated: now,
            },
        );
        self.inner.evict_oldest();

        Ok(counts)
    }

    /// 缓冲一次递增
    ///
    /// 为每个键计算最新值并记入缓冲；达到条数阈值时立即落库。永不
    /// 抛错到调用方（读源失败时该键从0起计，误差有界）。
    pub async fn buffer_increment(&self, identity: &str, keys: &[String]) {
        for key in keys {
            let base = self.current_value(identity, key).await;
            let next = base + 1;

            self.inner
                .pending
                .insert(key.clone(), PendingWrite { value: next });
            self.inner
                .stats
                .buffered_increments
                .fetch_add(1, Ordering::Relaxed);

            // 同步更新读缓存里的快照
            if let Some(mut entry) = self.inner.read_cache.get_mut(identity) {
                entry.counts.insert(key.clone(), next);
                entry.last_updated = Instant::now();
            }
        }

        if self.inner.pending.len() >= self.inner.config.flush_threshold {
            trace!("缓冲达到阈值，立即落库");
            self.inner.flush().await;
        }
    }

    /// 取键当前已知的最新值：读缓存 > 待落库缓冲 > 持久层
    async fn current_value(&self, identity: &str, key: &str) -> u64 {
        if let Some(entry) = self.inner.read_cache.get(identity) {
            if let Some(v) = entry.counts.get(key) {
                return *v;
            }
        }
        if let Some(pending) = self.inner.pending.get(key) {
            return pending.value;
        }
        match self.inner.store.get_many(&[key.to_string()]).await {
            Ok(counts) => counts.get(key).copied().unwrap_or(0),
            Err(e) => {
                // 读不到基准值就从0起计；丢计数好过失败
                warn!("递增前读取基准值失败 key={}: {}", key, e);
                0
            }
        }
    }

    /// 立即落库所有缓冲（测试与优雅停机用）
    pub async fn flush_now(&self) -> usize {
        self.inner.flush().await
    }

    /// 缓冲中的键数
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// 统计信息
    pub fn stats(&self) -> &CounterStats {
        &self.inner.stats
    }

    /// 停止批量任务并清空缓冲
    pub async fn shutdown(&mut self) {
        self.inner.flush().await;
        if let Some(handle) = self.flush_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CoalescingCounter {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_handle.take() {
            handle.abort();
        }
    }
}
