//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! TierGuard - Tiered Rate Limiting & Abuse Escalation Engine
//!
//! An abuse-prevention gate that decides, per request and per client
//! identity, whether to admit, delay, or permanently reject, escalating
//! penalties for repeat offenders.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use tierguard::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`RateLimitEngine`] - Main decision pipeline
//! - [`Verdict`] - Admission decision with retry metadata
//! - [`RateLimitConfig`] - Per-worker limits and thresholds
//! - [`GateError`] - Error types
//!
//! ## Components
//!
//! - [`IdentityResolver`] - Client identity from proxy headers
//! - [`CoalescingCounter`] - Batched usage counting
//! - [`ListStore`] / [`BlockStore`] / [`ViolationLedger`] - Durable gates
//! - [`EscalationPolicy`] - Violation history to block duration
//! - [`SampledEngine`] - Clearly-labeled degraded mode
//!
//! # Examples
//!
//! ```rust
//! use tierguard::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let resolver = Arc::new(StaticConfigResolver::default());
//!     let engine = RateLimitEngine::new(storage, resolver);
//!
//!     let identity = ClientIdentity::new("203.0.113.9");
//!     let verdict = engine
//!         .evaluate(&identity, "scraping", &RequestMeta::new())
//!         .await;
//!     assert!(verdict.allowed);
//!
//!     // 下游操作成功后才提交用量，失败的工作不消耗配额
//!     engine.commit(&identity, "scraping").await;
//! }
//! ```
//!
//! # Design
//!
//! - **Fail-open**: any storage error inside the decision pipeline turns
//!   into an `ERROR_FALLBACK` allow; the gate's outage never becomes the
//!   protected service's outage.
//! - **Write coalescing**: increments are buffered in-process and flushed
//!   in batches; a client can overrun its limit by a small bounded margin,
//!   which is the accepted cost/accuracy tradeoff.
//! - **No cross-key transactions**: concurrent read-then-write races may
//!   undercount by the number of racers; tolerated by design, never fixed
//!   with blocking locks.

pub mod prelude;

pub mod audit;
pub mod blocks;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod identity;
pub mod lists;
pub mod sampled;
pub mod storage;
pub mod violations;
pub mod window;

// 重新导出常用类型
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use blocks::BlockStore;
pub use config::{
    merge_config, CachedConfigResolver, ConfigResolver, ConfigSource, GlobalSettings,
    RateLimitConfig, RateLimitOverride, StaticConfigResolver, ViolationThresholds,
};
pub use counter::{CoalescingConfig, CoalescingCounter, CounterStats, CounterStorage, KvCounterStore};
pub use engine::{EngineStats, RateLimitEngine};
pub use error::{AdminResult, GateError, StorageError, Verdict, VerdictReason};
pub use escalation::EscalationPolicy;
pub use identity::{ClientIdentity, IdentityResolver, RequestMeta};
pub use lists::{ListKind, ListStore};
pub use sampled::SampledEngine;
pub use storage::{
    BlockRecord, FailingStorage, ListEntry, MemoryStorage, Storage, ViolationKind,
    ViolationRecord, ViolationSummary,
};
pub use violations::ViolationLedger;
pub use window::{
    bucket_label, counter_key, reset_time, LimitSnapshot, ResetTimes, UsageSnapshot, Window,
};
