//! 判定管道的跨组件行为

use crate::common::*;
use async_trait::async_trait;
use std::sync::Arc;
use tierguard::{
    ConfigResolver, ConfigSource, GateError, GlobalSettings, RateLimitConfig, RateLimitEngine,
    VerdictReason, ViolationThresholds, Window,
};

/// 总是失败的配置解析器
struct BrokenResolver;

#[async_trait]
impl ConfigResolver for BrokenResolver {
    async fn load_worker_config(&self, _worker: &str) -> Result<RateLimitConfig, GateError> {
        Err(GateError::ConfigError("resolver down".to_string()))
    }

    async fn load_global_settings(&self) -> Result<GlobalSettings, GateError> {
        Err(GateError::ConfigError("resolver down".to_string()))
    }
}

#[tokio::test]
async fn test_pipeline_order_deny_beats_block_and_usage() {
    let (engine, _) = create_test_engine(1);
    let id = test_identity(10);

    // 同时处于超限封禁和黑名单：黑名单优先
    engine.commit(&id, TEST_WORKER).await;
    engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    engine.add_to_deny_list(&id, "manual ban", "admin").await;

    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::Blacklisted);
    assert_eq!(verdict.http_status(), 403);
}

#[tokio::test]
async fn test_pipeline_order_allow_beats_block() {
    let (engine, _) = create_test_engine(1);
    let id = test_identity(11);

    engine.commit(&id, TEST_WORKER).await;
    engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    // 封禁存在，但白名单在封禁检查之前
    engine.add_to_allow_list(&id, "vip", "admin").await;

    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.reason, VerdictReason::Whitelisted);
}

#[tokio::test]
async fn test_window_tiebreak_reports_hourly_first() {
    // hourly与daily限额相同，二者同时超限时报告hourly
    let mut config = RateLimitConfig::with_limits((3, 3, 75, 300), ConfigSource::Custom);
    config.violation_thresholds = ViolationThresholds {
        soft: 2,
        hard: 3,
        ban: 10,
    };
    let storage = create_memory_storage();
    let resolver = Arc::new(
        tierguard::StaticConfigResolver::default().with_worker(TEST_WORKER, config),
    );
    let engine = RateLimitEngine::new(storage, resolver);
    let id = test_identity(12);

    for _ in 0..3 {
        engine.commit(&id, TEST_WORKER).await;
    }
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);
    assert_eq!(verdict.exceeded_window, Some(Window::Hourly));
}

#[tokio::test]
async fn test_broken_resolver_falls_back_to_conservative_limits() {
    let storage = create_memory_storage();
    let engine = RateLimitEngine::new(storage, Arc::new(BrokenResolver));
    let id = test_identity(13);

    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    // 全局开关回退默认（启用），限额回退到保守兜底 10/50/250/1000
    assert!(verdict.allowed);
    let limits = verdict.limits.unwrap();
    assert_eq!(limits.hourly, 10);
    assert_eq!(limits.daily, 50);
    assert_eq!(limits.weekly, 250);
    assert_eq!(limits.monthly, 1000);
}

#[tokio::test]
async fn test_clear_block_restores_usage_path() {
    let (engine, _) = create_test_engine(2);
    let id = test_identity(14);

    for _ in 0..2 {
        engine.commit(&id, TEST_WORKER).await;
    }
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);

    // 封禁期内是TemporarilyBlocked
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::TemporarilyBlocked);

    // 解封后重新走用量检查（仍超限，但原因变回RateLimitExceeded）
    assert!(engine.clear_block(&id).await.success);
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);
}

#[tokio::test]
async fn test_identities_are_isolated() {
    let (engine, _) = create_test_engine(1);
    let offender = test_identity(15);
    let bystander = test_identity(16);

    engine.commit(&offender, TEST_WORKER).await;
    let verdict = engine.evaluate(&offender, TEST_WORKER, &empty_meta()).await;
    assert!(!verdict.allowed);

    // 另一身份不受影响
    let verdict = engine.evaluate(&bystander, TEST_WORKER, &empty_meta()).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.usage.unwrap().hourly, 0);
}

#[tokio::test]
async fn test_workers_are_isolated() {
    let (engine, _) = create_test_engine(1);
    let id = test_identity(17);

    engine.commit(&id, TEST_WORKER).await;
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert!(!verdict.allowed);
    engine.clear_block(&id).await;

    // 同一身份在另一个工作器上的配额独立
    let verdict = engine.evaluate(&id, "ai_generation", &empty_meta()).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.usage.unwrap().hourly, 0);
}
