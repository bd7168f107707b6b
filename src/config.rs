//! 配置模块
//!
//! 定义每个工作器的限额配置、全局开关与配置解析器。
//!
//! 配置在每次判定中是不可变快照，可在请求之间热替换。解析器失败时
//! 回退到内置保守默认值（比所有具名工作器默认值都更严格）。

use crate::error::GateError;
use crate::window::{LimitSnapshot, Window};
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 配置缓存默认TTL（5分钟）
pub const DEFAULT_CONFIG_CACHE_TTL_SECS: u64 = 300;

/// 配置缓存容量（按工作器名）
pub const CONFIG_CACHE_CAPACITY: usize = 256;

/// 兜底限额（解析器不可用时生效）
pub const FALLBACK_LIMITS: (u64, u64, u64, u64) = (10, 50, 250, 1000);

lazy_static! {
    /// 具名工作器的内置默认限额（hourly, daily, weekly, monthly）
    ///
    /// 兜底限额必须严格小于这里的每一项。
    static ref WORKER_DEFAULT_LIMITS: HashMap<&'static str, (u64, u64, u64, u64)> = {
        let mut m = HashMap::new();
        m.insert("ai_generation", (30, 150, 800, 3000));
        m.insert("scraping", (60, 300, 1500, 6000));
        m
    };
}

/// 未具名工作器的默认限额
const GENERIC_DEFAULT_LIMITS: (u64, u64, u64, u64) = (20, 100, 500, 2000);

/// 配置来源标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// 存储中的自定义覆盖
    Custom,
    /// 内置工作器默认值
    Default,
    /// 解析失败后的保守兜底
    Fallback,
}

/// 违规阈值
///
/// 必须满足 soft < hard < ban。soft/hard 只影响日志级别，ban 触发
/// 自动拉黑。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationThresholds {
    pub soft: u64,
    pub hard: u64,
    pub ban: u64,
}

impl Default for ViolationThresholds {
    fn default() -> Self {
        Self {
            soft: 3,
            hard: 5,
            ban: 10,
        }
    }
}

/// 单个工作器的限额配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub weekly_limit: u64,
    pub monthly_limit: u64,
    pub violation_thresholds: ViolationThresholds,
    pub source: ConfigSource,
    pub version: u64,
}

impl RateLimitConfig {
    /// 由限额四元组构造
    pub fn with_limits(
        limits: (u64, u64, u64, u64),
        source: ConfigSource,
    ) -> Self {
        Self {
            hourly_limit: limits.0,
            daily_limit: limits.1,
            weekly_limit: limits.2,
            monthly_limit: limits.3,
            violation_thresholds: ViolationThresholds::default(),
            source,
            version: 1,
        }
    }

    /// 解析器不可用时的保守兜底配置
    pub fn fallback() -> Self {
        Self::with_limits(FALLBACK_LIMITS, ConfigSource::Fallback)
    }

    /// 指定工作器的内置默认配置
    pub fn default_for_worker(worker: &str) -> Self {
        let limits = WORKER_DEFAULT_LIMITS
            .get(worker)
            .copied()
            .unwrap_or(GENERIC_DEFAULT_LIMITS);
        Self::with_limits(limits, ConfigSource::Default)
    }

    /// 校验配置
    ///
    /// 窗口限额必须单调不减，违规阈值必须严格递增。
    pub fn validate(&self) -> Result<(), GateError> {
        if self.hourly_limit == 0 {
            return Err(GateError::ValidationError(
                "小时限额必须大于0".to_string(),
            ));
        }
        if self.hourly_limit > self.daily_limit
            || self.daily_limit > self.weekly_limit
            || self.weekly_limit > self.monthly_limit
        {
            return Err(GateError::ValidationError(format!(
                "窗口限额必须满足 hourly <= daily <= weekly <= monthly，实际: {}/{}/{}/{}",
                self.hourly_limit, self.daily_limit, self.weekly_limit, self.monthly_limit
            )));
        }
        let t = &self.violation_thresholds;
        if !(t.soft < t.hard && t.hard < t.ban) {
            return Err(GateError::ValidationError(format!(
                "违规阈值必须满足 soft < hard < ban，实际: {}/{}/{}",
                t.soft, t.hard, t.ban
            )));
        }
        Ok(())
    }

    /// 指定窗口的限额
    pub fn limit(&self, window: Window) -> u64 {
        match window {
            Window::Hourly => self.hourly_limit,
            Window::Daily => self.daily_limit,
            Window::Weekly => self.weekly_limit,
            Window::Monthly => self.monthly_limit,
        }
    }

    /// 限额快照（用于判定结果元数据）
    pub fn limits(&self) -> LimitSnapshot {
        LimitSnapshot {
            hourly: self.hourly_limit,
            daily: self.daily_limit,
            weekly: self.weekly_limit,
            monthly: self.monthly_limit,
        }
    }
}

/// 存储侧的部分覆盖
///
/// 字段为 `None` 时落到下一级默认值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitOverride {
    pub hourly_limit: Option<u64>,
    pub daily_limit: Option<u64>,
    pub weekly_limit: Option<u64>,
    pub monthly_limit: Option<u64>,
    pub violation_thresholds: Option<ViolationThresholds>,
    pub version: Option<u64>,
}

impl RateLimitOverride {
    fn is_empty(&self) -> bool {
        self.hourly_limit.is_none()
            && self.daily_limit.is_none()
            && self.weekly_limit.is_none()
            && self.monthly_limit.is_none()
            && self.violation_thresholds.is_none()
    }
}

/// 显式合并：存储覆盖 > 工作器默认值 > 兜底
///
/// 合并结果先校验后接受；校验失败返回错误，由调用方决定兜底。
pub fn merge_config(
    overrides: Option<&RateLimitOverride>,
    worker: &str,
) -> Result<RateLimitConfig, GateError> {
    let mut config = RateLimitConfig::default_for_worker(worker);

    if let Some(o) = overrides {
        if !o.is_empty() {
            if let Some(v) = o.hourly_limit {
                config.hourly_limit = v;
            }
            if let Some(v) = o.daily_limit {
                config.daily_limit = v;
            }
            if let Some(v) = o.weekly_limit {
                config.weekly_limit = v;
            }
            if let Some(v) = o.monthly_limit {
                config.monthly_limit = v;
            }
            if let Some(t) = o.violation_thresholds {
                config.violation_thresholds = t;
            }
            config.source = ConfigSource::Custom;
        }
        if let Some(v) = o.version {
            config.version = v;
        }
    }

    config.validate()?;
    Ok(config)
}

/// 全局开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub enable_rate_limiting: bool,
    pub enable_ip_whitelist: bool,
    pub enable_ip_blacklist: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            enable_ip_whitelist: true,
            enable_ip_blacklist: true,
        }
    }
}

/// 配置解析器
///
/// 外部协作者：提供按工作器的限额配置和全局开关。实现可以读库、
/// 读文件或返回静态表。
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    /// 加载指定工作器的限额配置
    async fn load_worker_config(&self, worker: &str) -> Result<RateLimitConfig, GateError>;

    /// 加载全局开关
    async fn load_global_settings(&self) -> Result<GlobalSettings, GateError>;
}

/// 静态配置解析器
///
/// 固定配置表，未登记的工作器落到内置默认值。
pub struct StaticConfigResolver {
    configs: HashMap<String, RateLimitConfig>,
    settings: GlobalSettings,
}

impl StaticConfigResolver {
    pub fn new(settings: GlobalSettings) -> Self {
        Self {
            configs: HashMap::new(),
            settings,
        }
    }

    /// 登记一个工作器配置（链式）
    pub fn with_worker(mut self, worker: &str, config: RateLimitConfig) -> Self {
        self.configs.insert(worker.to_string(), config);
        self
    }
}

impl Default for StaticConfigResolver {
    fn default() -> Self {
        Self::new(GlobalSettings::default())
    }
}

#[async_trait]
impl ConfigResolver for StaticConfigResolver {
    async fn load_worker_config(&self, worker: &str) -> Result<RateLimitConfig, GateError> {
        match self.configs.get(worker) {
            Some(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            None => Ok(RateLimitConfig::default_for_worker(worker)),
        }
    }

    async fn load_global_settings(&self) -> Result<GlobalSettings, GateError> {
        Ok(self.settings)
    }
}

/// 缓存条目
struct CachedConfig {
    config: RateLimitConfig,
    fetched_at: Instant,
}

/// 带短TTL缓存的配置解析器装饰器
///
/// 每个判定周期拿到的都是新鲜（或5分钟内）的快照，绝不原地修改。
pub struct CachedConfigResolver<R: ConfigResolver> {
    inner: Arc<R>,
    ttl: Duration,
    worker_cache: Mutex<LruCache<String, CachedConfig>>,
    settings_cache: Mutex<Option<(GlobalSettings, Instant)>>,
}

impl<R: ConfigResolver> CachedConfigResolver<R> {
    pub fn new(inner: Arc<R>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            worker_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CONFIG_CACHE_CAPACITY).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
            settings_cache: Mutex::new(None),
        }
    }

    pub fn with_default_ttl(inner: Arc<R>) -> Self {
        Self::new(inner, Duration::from_secs(DEFAULT_CONFIG_CACHE_TTL_SECS))
    }

    /// 清空缓存（配置变更后立即生效）
    pub fn invalidate(&self) {
        self.worker_cache.lock().clear();
        *self.settings_cache.lock() = None;
        debug!("配置缓存已清空");
    }
}

#[async_trait]
impl<R: ConfigResolver> ConfigResolver for CachedConfigResolver<R> {
    async fn load_worker_config(&self, worker: &str) -> Result<RateLimitConfig, GateError> {
        {
            let mut cache = self.worker_cache.lock();
            if let Some(entry) = cache.get(worker) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.config.clone());
                }
            }
        }

        let config = self.inner.load_worker_config(worker).await?;
        self.worker_cache.lock().put(
            worker.to_string(),
            CachedConfig {
                config: config.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(config)
    }

    async fn load_global_settings(&self) -> Result<GlobalSettings, GateError> {
        {
            let cache = self.settings_cache.lock();
            if let Some((settings, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() < self.ttl {
                    return Ok(*settings);
                }
            }
        }

        match self.inner.load_global_settings().await {
            Ok(settings) => {
                *self.settings_cache.lock() = Some((settings, Instant::now()));
                Ok(settings)
            }
            Err(e) => {
                warn!("全局开关加载失败: {}", e);
                Err(e)
            }
        }
    }
}
