//! 端到端测试：存储故障下的兜底放行
//!
//! 准入网关的不可用绝不能变成受保护服务的不可用：存储整体下线时
//! 所有判定放行，提交静默丢弃，不向调用方抛任何错误。

use crate::common::*;
use std::sync::Arc;
use tierguard::{FailingStorage, RateLimitEngine, StaticConfigResolver, VerdictReason};

fn broken_engine() -> RateLimitEngine {
    RateLimitEngine::new(
        Arc::new(FailingStorage),
        Arc::new(StaticConfigResolver::default().with_worker(TEST_WORKER, tight_config(1))),
    )
}

#[tokio::test]
async fn test_storage_outage_allows_everything() {
    let engine = broken_engine();

    for i in 0..10 {
        let verdict = engine
            .evaluate(&test_identity(i), TEST_WORKER, &empty_meta())
            .await;
        assert!(verdict.allowed, "存储故障时必须放行");
        assert_eq!(verdict.reason, VerdictReason::ErrorFallback);
        assert_eq!(verdict.http_status(), 200);
        // 错误随判定结果返回，供观测
        assert!(verdict.error.is_some());
    }
    assert_eq!(engine.stats().error_fallbacks(), 10);
}

#[tokio::test]
async fn test_commit_during_outage_never_blocks_caller() {
    let engine = broken_engine();
    let id = test_identity(40);

    // 丢计数好过阻塞：提交在故障期间静默完成
    for _ in 0..5 {
        engine.commit(&id, TEST_WORKER).await;
    }
    assert_eq!(engine.stats().commits(), 5);
}

#[tokio::test]
async fn test_admin_ops_report_failure_instead_of_panicking() {
    let engine = broken_engine();
    let id = test_identity(41);

    // 管理操作把错误装进结果返回
    let result = engine.add_to_deny_list(&id, "abuse", "admin").await;
    assert!(!result.success);
    assert!(result.error.is_some());

    let result = engine.clear_block(&id).await;
    assert!(!result.success);
}
