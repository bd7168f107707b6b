//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 准入判定引擎
//!
//! 把名单、封禁、用量计数、违规账本与惩罚升级组合成单一判定管道。
//! 管道在单个请求内严格按序执行，每一步都可能终局退出：
//!
//! 1. 黑名单 -> 永久拒绝（记违规 blacklist_access）
//! 2. 白名单 -> 无条件放行，跳过计数
//! 3. 临时封禁 -> 拒绝并给出重试时间（记违规 blocked_access_attempt）
//! 4. 用量检查 -> 任一窗口超限则施加惩罚并拒绝（记违规 rate_limit_exceeded）
//! 5. 放行（不计数；计数由调用方在下游操作成功后显式提交）
//!
//! 错误语义：步骤1-4中任何存储错误都被引擎边界捕获并映射为放行
//! （fail-open）。准入网关自身的不可用绝不能变成受保护服务的不可用。

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::blocks::BlockStore;
use crate::config::{ConfigResolver, GlobalSettings, RateLimitConfig};
use crate::counter::{CoalescingConfig, CoalescingCounter};
use crate::error::{AdminResult, GateError, Verdict, VerdictReason};
use crate::escalation::{EscalationPolicy, AUTO_BAN_REASON};
use crate::identity::{ClientIdentity, RequestMeta};
use crate::lists::{ListKind, ListStore};
use crate::storage::{BlockRecord, Storage, ViolationKind};
use crate::violations::ViolationLedger;
use crate::window::{counter_key, ResetTimes, UsageSnapshot, Window};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, instrument, trace, warn};

/// 引擎统计信息
#[derive(Debug, Default)]
pub struct EngineStats {
    evaluations: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    error_fallbacks: AtomicU64,
    commits: AtomicU64,
}

impl EngineStats {
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn allowed(&self) -> u64 {
        self.allowed.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }

    pub fn error_fallbacks(&self) -> u64 {
        self.error_fallbacks.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

/// 准入判定引擎
///
/// 编排各组件但不拥有任何持久化记录；记录生命周期归各自存储管理。
pub struct RateLimitEngine {
    /// 配置解析器（外部协作者）
    resolver: Arc<dyn ConfigResolver>,
    /// 名单
    lists: ListStore,
    /// 临时封禁
    blocks: BlockStore,
    /// 违规账本
    ledger: ViolationLedger,
    /// 写合并计数器
    counter: CoalescingCounter,
    /// 升级策略
    escalation: EscalationPolicy,
    /// 变更日志收集器
    audit: Arc<dyn AuditSink>,
    /// 统计
    stats: EngineStats,
}

impl RateLimitEngine {
    /// 创建引擎实例
    pub fn new(storage: Arc<dyn Storage>, resolver: Arc<dyn ConfigResolver>) -> Self {
        Self::with_counter_config(storage, resolver, CoalescingConfig::default())
    }

    /// 使用自定义写合并配置创建
    pub fn with_counter_config(
        storage: Arc<dyn Storage>,
        resolver: Arc<dyn ConfigResolver>,
        counter_config: CoalescingConfig,
    ) -> Self {
        Self {
            resolver,
            lists: ListStore::new(storage.clone()),
            blocks: BlockStore::new(storage.clone()),
            ledger: ViolationLedger::new(storage.clone()),
            counter: CoalescingCounter::new(storage, counter_config),
            escalation: EscalationPolicy::default(),
            audit: Arc::new(TracingAuditSink),
            stats: EngineStats::default(),
        }
    }

    /// 替换升级策略（链式）
    pub fn with_escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = policy;
        self
    }

    /// 替换变更日志收集器（链式）
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// 名单访问（管理查询用）
    pub fn lists(&self) -> &ListStore {
        &self.lists
    }

    /// 封禁访问（管理查询用）
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// 统计信息
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// 准入判定
    ///
    /// 同步于请求路径执行，永不抛错：内部任何存储错误都映射为
    /// 兜底放行，错误文本随判定结果返回供观测。
    #[instrument(skip(self, meta), fields(identity = %identity, worker = worker))]
    pub async fn evaluate(
        &self,
        identity: &ClientIdentity,
        worker: &str,
        meta: &RequestMeta,
    ) -> Verdict {
        self.stats.evaluations.fetch_add(1, Ordering::Relaxed);

        let verdict = match self.evaluate_inner(identity, worker, meta).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // 唯一的fail-open映射点
                warn!("判定管道出错，兜底放行: {}", e);
                self.stats.error_fallbacks.fetch_add(1, Ordering::Relaxed);
                Verdict::error_fallback(&e)
            }
        };

        if verdict.allowed {
            self.stats.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
        }
        verdict
    }

    /// 判定管道本体
    ///
    /// 返回`Err`即触发外层的兜底放行。
    async fn evaluate_inner(
        &self,
        identity: &ClientIdentity,
        worker: &str,
        _meta: &RequestMeta,
    ) -> Result<Verdict, GateError> {
        let settings = self.load_settings().await;

        // 全局开关关闭时在一切检查之前放行
        if !settings.enable_rate_limiting {
            trace!("限流全局关闭，直接放行");
            return Ok(Verdict::allow_unconditional(
                VerdictReason::RateLimitingDisabled,
            ));
        }

        // 1. 黑名单：先于白名单，命中即永久拒绝
        if settings.enable_ip_blacklist {
            if let Some(entry) = self.lists.check(ListKind::Deny, identity).await? {
                debug!("黑名单命中: identity={}", identity);
                self.record_violation(
                    identity,
                    ViolationKind::BlacklistAccess,
                    worker,
                    serde_json::json!({ "list_reason": entry.reason }),
                )
                .await;
                return Ok(Verdict::deny_blacklisted());
            }
        }

        // 2. 白名单：无条件放行，跳过所有计数
        if settings.enable_ip_whitelist
            && self
                .lists
                .check(ListKind::Allow, identity)
                .await?
                .is_some()
        {
            trace!("白名单放行: identity={}", identity);
            return Ok(Verdict::allow_unconditional(VerdictReason::Whitelisted));
        }

        // 3. 临时封禁：时间戳判定权威
        let now = Utc::now();
        if let Some(block) = self.blocks.current(identity, now).await? {
            let retry_after = block.remaining_secs(now);
            debug!(
                "封禁期内访问: identity={}, retry_after={}s",
                identity, retry_after
            );
            // 封禁期间仍在叩门，单独记一类违规供升级区分
            self.record_violation(
                identity,
                ViolationKind::BlockedAccessAttempt,
                worker,
                serde_json::json!({ "expires_at": block.expires_at }),
            )
            .await;
            return Ok(Verdict::deny_blocked(retry_after));
        }

        // 4. 用量检查：四个窗口按固定顺序，首个超限即退出
        let config = self.load_config(worker).await;
        let keys: Vec<String> = Window::ALL
            .iter()
            .map(|w| counter_key(identity.as_str(), worker, *w, now))
            .collect();
        let counts = self.counter.get_counts(identity.as_str(), &keys).await?;

        let mut usage = UsageSnapshot::default();
        for (window, key) in Window::ALL.iter().zip(keys.iter()) {
            usage.set(*window, counts.get(key).copied().unwrap_or(0));
        }
        let limits = config.limits();
        let reset_times = ResetTimes::at(now);

        for window in Window::ALL {
            if usage.get(window) >= config.limit(window) {
                debug!(
                    "用量超限: identity={}, worker={}, window={}, usage={}, limit={}",
                    identity,
                    worker,
                    window,
                    usage.get(window),
                    config.limit(window)
                );
                let retry_after = self
                    .apply_penalty(identity, worker, window, &usage, &config, now)
                    .await?;
                return Ok(Verdict::deny_rate_limited(
                    usage,
                    limits,
                    reset_times,
                    window,
                    retry_after,
                ));
            }
        }

        // 5. 放行；计数由调用方成功后提交
        Ok(Verdict::allow(usage, limits, reset_times))
    }

    /// 提交一次成功用量
    ///
    /// 判定与计数分离：失败或中止的下游操作不消耗配额。唯一会改变
    /// 存量计数的入口。递增进入进程级缓冲，批量落库失败只记日志。
    #[instrument(skip(self), fields(identity = %identity, worker = worker))]
    pub async fn commit(&self, identity: &ClientIdentity, worker: &str) {
        let now = Utc::now();
        let keys: Vec<String> = Window::ALL
            .iter()
            .map(|w| counter_key(identity.as_str(), worker, *w, now))
            .collect();
        self.counter.buffer_increment(identity.as_str(), &keys).await;
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        trace!("用量已提交: identity={}, worker={}", identity, worker);
    }

    // ------------------------------------------------------------------
    // 管理操作
    // ------------------------------------------------------------------

    /// 加入白名单
    #[instrument(skip(self))]
    pub async fn add_to_allow_list(
        &self,
        identity: &ClientIdentity,
        reason: &str,
        added_by: &str,
    ) -> AdminResult {
        self.list_change(ListKind::Allow, "add", identity, reason, added_by)
            .await
    }

    /// 移出白名单
    #[instrument(skip(self))]
    pub async fn remove_from_allow_list(&self, identity: &ClientIdentity) -> AdminResult {
        self.list_removal(ListKind::Allow, identity).await
    }

    /// 加入黑名单
    #[instrument(skip(self))]
    pub async fn add_to_deny_list(
        &self,
        identity: &ClientIdentity,
        reason: &str,
        added_by: &str,
    ) -> AdminResult {
        self.list_change(ListKind::Deny, "add", identity, reason, added_by)
            .await
    }

    /// 移出黑名单
    #[instrument(skip(self))]
    pub async fn remove_from_deny_list(&self, identity: &ClientIdentity) -> AdminResult {
        self.list_removal(ListKind::Deny, identity).await
    }

    /// 解除临时封禁
    #[instrument(skip(self))]
    pub async fn clear_block(&self, identity: &ClientIdentity) -> AdminResult {
        match self.blocks.clear(identity).await {
            Ok(existed) => {
                if existed {
                    self.audit
                        .record(AuditEvent::BlockChange {
                            timestamp: Utc::now(),
                            action: "clear".to_string(),
                            identity: identity.to_string(),
                            reason: "manual".to_string(),
                            expires_at: None,
                        })
                        .await;
                }
                AdminResult::ok()
            }
            Err(e) => AdminResult::fail(e),
        }
    }

    async fn list_change(
        &self,
        kind: ListKind,
        action: &str,
        identity: &ClientIdentity,
        reason: &str,
        added_by: &str,
    ) -> AdminResult {
        match self.lists.add(kind, identity, reason, added_by).await {
            Ok(entry) => {
                self.audit
                    .record(AuditEvent::ListChange {
                        timestamp: Utc::now(),
                        list: format!("{:?}", kind).to_lowercase(),
                        action: action.to_string(),
                        identity: identity.to_string(),
                        reason: entry.reason,
                        operator: added_by.to_string(),
                    })
                    .await;
                AdminResult::ok()
            }
            Err(e) => AdminResult::fail(e),
        }
    }

    async fn list_removal(&self, kind: ListKind, identity: &ClientIdentity) -> AdminResult {
        match self.lists.remove(kind, identity).await {
            Ok(removed) => {
                if removed {
                    self.audit
                        .record(AuditEvent::ListChange {
                            timestamp: Utc::now(),
                            list: format!("{:?}", kind).to_lowercase(),
                            action: "remove".to_string(),
                            identity: identity.to_string(),
                            reason: String::new(),
                            operator: String::new(),
                        })
                        .await;
                }
                AdminResult::ok()
            }
            Err(e) => AdminResult::fail(e),
        }
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    /// 加载全局开关；解析失败时用默认开关继续
    async fn load_settings(&self) -> GlobalSettings {
        match self.resolver.load_global_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("全局开关加载失败，使用默认值: {}", e);
                GlobalSettings::default()
            }
        }
    }

    /// 加载工作器配置；解析失败或配置非法时回退到保守兜底
    async fn load_config(&self, worker: &str) -> RateLimitConfig {
        match self.resolver.load_worker_config(worker).await {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!("工作器配置非法，回退兜底: worker={}, {}", worker, e);
                    RateLimitConfig::fallback()
                }
            },
            Err(e) => {
                warn!("工作器配置加载失败，回退兜底: worker={}, {}", worker, e);
                RateLimitConfig::fallback()
            }
        }
    }

    /// 施加惩罚：升级封禁，必要时自动拉黑
    ///
    /// # 返回
    /// - 封禁时长（秒），作为判定结果的重试等待
    async fn apply_penalty(
        &self,
        identity: &ClientIdentity,
        worker: &str,
        window: Window,
        usage: &UsageSnapshot,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<u64, GateError> {
        // 既有违规数不含本次
        let prior = self.ledger.summary(identity).await?.count_last_24h(now);
        let duration = self.escalation.block_duration(prior);

        let record = BlockRecord {
            identity: identity.clone(),
            expires_at: now + chrono::Duration::seconds(duration.as_secs() as i64),
            reason: ViolationKind::RateLimitExceeded.as_str().to_string(),
            violation_count: prior + 1,
            worker: worker.to_string(),
            applied_at: now,
        };
        self.blocks.apply(&record).await?;

        self.audit
            .record(AuditEvent::BlockChange {
                timestamp: now,
                action: "apply".to_string(),
                identity: identity.to_string(),
                reason: record.reason.clone(),
                expires_at: Some(record.expires_at),
            })
            .await;

        // 记录违规并按更新后的24h计数检查ban阈值
        let context = serde_json::json!({
            "window": window.as_str(),
            "usage": usage.get(window),
            "limit": config.limit(window),
        });
        match self
            .ledger
            .record_at(identity, ViolationKind::RateLimitExceeded, worker, context, now)
            .await
        {
            Ok(summary) => {
                let updated = summary.count_last_24h(now);
                let thresholds = &config.violation_thresholds;
                if updated >= thresholds.hard {
                    error!(
                        "违规达到hard阈值: identity={}, 24h内={}",
                        identity, updated
                    );
                } else if updated >= thresholds.soft {
                    warn!("违规达到soft阈值: identity={}, 24h内={}", identity, updated);
                }
                if updated >= thresholds.ban {
                    self.auto_ban(identity, updated).await;
                }
            }
            Err(e) => {
                // 判定已经成立，账本写失败不改变结果
                warn!("违规记录失败: identity={}, {}", identity, e);
            }
        }

        Ok(duration.as_secs())
    }

    /// 自动拉黑：不可逆，需管理操作才能移除
    async fn auto_ban(&self, identity: &ClientIdentity, violations_24h: u64) {
        match self
            .lists
            .add(ListKind::Deny, identity, AUTO_BAN_REASON, "system")
            .await
        {
            Ok(_) => {
                error!(
                    "自动拉黑: identity={}, 24h内违规={}",
                    identity, violations_24h
                );
                self.audit
                    .record(AuditEvent::AutoBan {
                        timestamp: Utc::now(),
                        identity: identity.to_string(),
                        violations_24h,
                    })
                    .await;
            }
            Err(e) => {
                error!("自动拉黑写入失败: identity={}, {}", identity, e);
            }
        }
    }

    /// 在拒绝路径上尽力记录违规
    ///
    /// 判定结果已经确定，账本写失败只记日志不升级为错误。
    async fn record_violation(
        &self,
        identity: &ClientIdentity,
        kind: ViolationKind,
        worker: &str,
        context: serde_json::Value,
    ) {
        if let Err(e) = self.ledger.record(identity, kind, worker, context).await {
            warn!(
                "违规记录失败: identity={}, kind={}, {}",
                identity,
                kind.as_str(),
                e
            );
        }
    }
}
