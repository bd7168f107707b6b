//! Prelude模块
//!
//! `use tierguard::prelude::*;` 一次导入常用类型。

pub use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use crate::blocks::BlockStore;
pub use crate::config::{
    ConfigResolver, ConfigSource, GlobalSettings, RateLimitConfig, StaticConfigResolver,
    ViolationThresholds,
};
pub use crate::counter::{CoalescingConfig, CoalescingCounter};
pub use crate::engine::{EngineStats, RateLimitEngine};
pub use crate::error::{AdminResult, GateError, StorageError, Verdict, VerdictReason};
pub use crate::escalation::EscalationPolicy;
pub use crate::identity::{ClientIdentity, IdentityResolver, RequestMeta};
pub use crate::lists::{ListKind, ListStore};
pub use crate::storage::{MemoryStorage, Storage};
pub use crate::violations::ViolationLedger;
pub use crate::window::{LimitSnapshot, ResetTimes, UsageSnapshot, Window};
