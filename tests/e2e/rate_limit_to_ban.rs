//! 端到端测试：超限到自动拉黑的完整流程
//!
//! 测试场景：
//! 1. 正常请求消耗配额
//! 2. 超限触发首次封禁
//! 3. 封禁期内继续叩门
//! 4. 封禁过期后再犯，惩罚升级
//! 5. 24小时违规数达到ban阈值，自动拉黑
//! 6. 管理操作解除后恢复正常判定路径

use crate::common::*;
use std::time::Duration;
use tierguard::{ListKind, VerdictReason};
use tokio::time::sleep;

#[tokio::test]
async fn test_e2e_rate_limit_to_auto_ban() {
    init_tracing();
    let (engine, _) = create_fast_penalty_engine(2);
    let id = test_identity(30);

    // Step 1: 正常请求 - 2个请求在限额内
    for _ in 0..2 {
        let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
        assert!(verdict.allowed, "限额内的请求应当放行");
        engine.commit(&id, TEST_WORKER).await;
    }

    // Step 2: 超限 - 首次违规，封禁1秒（测试用时长表）
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);
    assert_eq!(verdict.retry_after_secs, Some(1));
    assert_eq!(verdict.http_status(), 429);

    // Step 3: 封禁期内叩门 - 另一类违规
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::TemporarilyBlocked);

    // Step 4: 封禁过期后再犯 - 惩罚升级
    // 此时24小时内已有2次违规（超限+叩门），升级到第3档
    sleep(Duration::from_millis(1200)).await;
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);
    assert_eq!(verdict.retry_after_secs, Some(3));

    // Step 5: 清除封禁再犯一次，第4次违规达到ban=4，自动拉黑
    engine.clear_block(&id).await;
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);

    let entry = engine
        .lists()
        .check(ListKind::Deny, &id)
        .await
        .unwrap()
        .expect("达到ban阈值后应有黑名单条目");
    assert!(entry.active);
    assert_eq!(entry.added_by, "system");

    // 此后一切请求都在第一步被拒
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::Blacklisted);
    assert_eq!(verdict.http_status(), 403);

    // Step 6: 管理解除 - 移出黑名单并解封后回到用量判定路径
    assert!(engine.remove_from_deny_list(&id).await.success);
    assert!(engine.clear_block(&id).await.success);
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    // 配额仍然用尽，但不再是黑名单拒绝
    assert_eq!(verdict.reason, VerdictReason::RateLimitExceeded);

    // 其他身份全程不受影响
    let bystander = test_identity(31);
    let verdict = engine.evaluate(&bystander, TEST_WORKER, &empty_meta()).await;
    assert!(verdict.allowed);
}

#[tokio::test]
async fn test_e2e_block_expiry_restores_service_within_quota() {
    let (engine, storage) = create_fast_penalty_engine(50);
    let id = test_identity(32);

    // 人工施加一个1秒封禁（配额本身没用完）
    let now = chrono::Utc::now();
    let blocks = tierguard::BlockStore::new(storage);
    blocks
        .apply(&tierguard::BlockRecord {
            identity: id.clone(),
            expires_at: now + chrono::Duration::seconds(1),
            reason: "manual".to_string(),
            violation_count: 1,
            worker: TEST_WORKER.to_string(),
            applied_at: now,
        })
        .await
        .unwrap();

    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert_eq!(verdict.reason, VerdictReason::TemporarilyBlocked);

    // 封禁过期后恢复正常服务
    sleep(Duration::from_millis(1200)).await;
    let verdict = engine.evaluate(&id, TEST_WORKER, &empty_meta()).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.reason, VerdictReason::Ok);
}
