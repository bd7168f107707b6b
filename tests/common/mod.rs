//! 测试通用工具模块
//!
//! 提供测试中常用的构造函数和辅助配置。

#![allow(dead_code)]

use std::sync::Arc;
use tierguard::{
    ClientIdentity, CoalescingConfig, ConfigSource, EscalationPolicy, GlobalSettings,
    MemoryStorage, RateLimitConfig, RateLimitEngine, RequestMeta, StaticConfigResolver,
    ViolationThresholds,
};

/// 测试默认工作器名
pub const TEST_WORKER: &str = "scraping";

/// 初始化测试日志（重复调用安全）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// 创建测试用的内存存储
pub fn create_memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// 小限额配置（测试用）
///
/// 阈值收紧到 soft=2 / hard=3 / ban=4，便于在测试里走完升级全程。
pub fn tight_config(hourly: u64) -> RateLimitConfig {
    let mut config = RateLimitConfig::with_limits(
        (hourly, hourly * 5, hourly * 25, hourly * 100),
        ConfigSource::Custom,
    );
    config.violation_thresholds = ViolationThresholds {
        soft: 2,
        hard: 3,
        ban: 4,
    };
    config
}

/// 秒级的升级策略（测试用）
pub fn fast_escalation() -> EscalationPolicy {
    EscalationPolicy {
        first_secs: 1,
        second_secs: 2,
        third_secs: 3,
        max_secs: 5,
    }
}

/// 创建测试引擎：内存存储 + 固定配置表
pub fn create_test_engine(hourly: u64) -> (RateLimitEngine, Arc<MemoryStorage>) {
    let storage = create_memory_storage();
    let resolver =
        Arc::new(StaticConfigResolver::default().with_worker(TEST_WORKER, tight_config(hourly)));
    let engine = RateLimitEngine::new(storage.clone(), resolver);
    (engine, storage)
}

/// 创建秒级惩罚的测试引擎
pub fn create_fast_penalty_engine(hourly: u64) -> (RateLimitEngine, Arc<MemoryStorage>) {
    let storage = create_memory_storage();
    let resolver =
        Arc::new(StaticConfigResolver::default().with_worker(TEST_WORKER, tight_config(hourly)));
    let engine =
        RateLimitEngine::new(storage.clone(), resolver).with_escalation(fast_escalation());
    (engine, storage)
}

/// 创建关闭限流的引擎
pub fn create_disabled_engine() -> RateLimitEngine {
    let settings = GlobalSettings {
        enable_rate_limiting: false,
        enable_ip_whitelist: true,
        enable_ip_blacklist: true,
    };
    RateLimitEngine::new(
        create_memory_storage(),
        Arc::new(StaticConfigResolver::new(settings)),
    )
}

/// 测试身份
pub fn test_identity(last_octet: u8) -> ClientIdentity {
    ClientIdentity::new(format!("203.0.113.{}", last_octet))
}

/// 空请求元数据
pub fn empty_meta() -> RequestMeta {
    RequestMeta::new()
}

/// 放宽落库定时器的写合并配置，避免后台任务干扰断言
pub fn quiet_counter_config() -> CoalescingConfig {
    CoalescingConfig::new()
        .flush_interval(std::time::Duration::from_secs(3600))
        .flush_threshold(10_000)
}
