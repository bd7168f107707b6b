//! 降级采样模式
//!
//! 明确标注的弱保证变体：只有每N个请求中的1个走完整判定管道，其余
//! 直接放行且不产生任何存储流量；提交照常进入缓冲。适合存储成本或
//! 延迟压力极端时的降级开关，绝不并入主引擎的语义。
//!
//! 弱保证的含义：未被抽中的请求不经过黑名单、封禁和用量检查，滥用
//! 者最多有 N-1 个请求在抽样间隙漏网。

use crate::engine::RateLimitEngine;
use crate::error::{AdminResult, Verdict, VerdictReason};
use crate::identity::{ClientIdentity, RequestMeta};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// 默认采样率：每10个请求检查1个
pub const DEFAULT_SAMPLE_EVERY: u64 = 10;

/// 采样判定引擎
///
/// 确定性计数器取代随机数：行为可测试，不引入额外依赖。
pub struct SampledEngine {
    engine: Arc<RateLimitEngine>,
    sample_every: u64,
    counter: AtomicU64,
}

impl SampledEngine {
    /// 包装主引擎
    ///
    /// # 参数
    /// - `sample_every`: 每N个请求抽1个走完整管道，最小为1（等同主引擎）
    pub fn new(engine: Arc<RateLimitEngine>, sample_every: u64) -> Self {
        Self {
            engine,
            sample_every: sample_every.max(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn with_default_rate(engine: Arc<RateLimitEngine>) -> Self {
        Self::new(engine, DEFAULT_SAMPLE_EVERY)
    }

    /// 采样准入判定
    pub async fn evaluate(
        &self,
        identity: &ClientIdentity,
        worker: &str,
        meta: &RequestMeta,
    ) -> Verdict {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        if n % self.sample_every == 0 {
            self.engine.evaluate(identity, worker, meta).await
        } else {
            trace!("采样未抽中，跳过检查: identity={}", identity);
            Verdict::allow_unconditional(VerdictReason::SampledBypass)
        }
    }

    /// 提交照常走主引擎缓冲，保证计数尽量完整
    pub async fn commit(&self, identity: &ClientIdentity, worker: &str) {
        self.engine.commit(identity, worker).await;
    }

    /// 管理操作直通主引擎
    pub async fn clear_block(&self, identity: &ClientIdentity) -> AdminResult {
        self.engine.clear_block(identity).await
    }

    /// 主引擎访问
    pub fn inner(&self) -> &RateLimitEngine {
        &self.engine
    }
}
