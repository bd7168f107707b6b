//! 升级策略的对外行为

use std::time::Duration;
use tierguard::EscalationPolicy;

#[test]
fn test_production_duration_table() {
    let policy = EscalationPolicy::default();
    // 5分钟 / 30分钟 / 2小时 / 24小时
    assert_eq!(policy.block_duration(0), Duration::from_secs(300));
    assert_eq!(policy.block_duration(1), Duration::from_secs(1800));
    assert_eq!(policy.block_duration(2), Duration::from_secs(7200));
    assert_eq!(policy.block_duration(3), Duration::from_secs(86400));
}

#[test]
fn test_monotonicity_over_history() {
    let policy = EscalationPolicy::default();
    let mut previous = Duration::ZERO;
    for prior in 0..4u64 {
        let duration = policy.block_duration(prior);
        assert!(duration > previous, "prior={} 未递增", prior);
        previous = duration;
    }
    // 超过3次之后停在上限
    assert_eq!(policy.block_duration(4), policy.block_duration(100));
}
