//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型与判定结果定义
//!
//! 使用thiserror定义所有错误类型。存储错误永远不会穿透到引擎外部：
//! 引擎边界将其统一映射为放行（fail-open）。

use crate::window::{LimitSnapshot, ResetTimes, UsageSnapshot, Window};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TierGuard 错误类型
#[derive(Error, Debug)]
pub enum GateError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    StorageError(#[from] StorageError),

    /// 验证错误
    #[error("验证错误: {0}")]
    ValidationError(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

/// 存储错误
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),

    /// 未找到
    #[error("未找到: {0}")]
    NotFound(String),
}

/// 判定原因
///
/// 线上格式与调用方约定保持一致（SCREAMING_SNAKE_CASE）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictReason {
    /// 正常放行
    Ok,
    /// 白名单放行（跳过所有计数）
    Whitelisted,
    /// 全局开关关闭
    RateLimitingDisabled,
    /// 内部错误时的放行兜底
    ErrorFallback,
    /// 降级采样模式下未抽中检查的放行
    SampledBypass,
    /// 黑名单命中（永久拒绝）
    Blacklisted,
    /// 临时封禁中
    TemporarilyBlocked,
    /// 用量超限
    RateLimitExceeded,
}

/// 判定结果
///
/// 引擎对单个请求的最终裁决。拒绝时附带可用于构造精确重试提示的元数据。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    /// 是否放行
    pub allowed: bool,
    /// 判定原因
    pub reason: VerdictReason,
    /// 当前用量（按窗口）
    pub usage: Option<UsageSnapshot>,
    /// 配置限额（按窗口）
    pub limits: Option<LimitSnapshot>,
    /// 各窗口重置时间
    pub reset_times: Option<ResetTimes>,
    /// 建议重试等待（秒），仅临时拒绝时存在
    pub retry_after_secs: Option<u64>,
    /// 首个超限窗口
    pub exceeded_window: Option<Window>,
    /// 触发兜底放行的错误描述（仅观测用途）
    pub error: Option<String>,
}

impl Verdict {
    /// 正常放行，附带用量快照
    pub fn allow(usage: UsageSnapshot, limits: LimitSnapshot, reset_times: ResetTimes) -> Self {
        Self {
            allowed: true,
            reason: VerdictReason::Ok,
            usage: Some(usage),
            limits: Some(limits),
            reset_times: Some(reset_times),
            retry_after_secs: None,
            exceeded_window: None,
            error: None,
        }
    }

    /// 无条件放行（白名单、全局开关关闭）
    pub fn allow_unconditional(reason: VerdictReason) -> Self {
        Self {
            allowed: true,
            reason,
            usage: None,
            limits: None,
            reset_times: None,
            retry_after_secs: None,
            exceeded_window: None,
            error: None,
        }
    }

    /// 兜底放行：存储层异常时宁可放行，不可阻塞受保护服务
    pub fn error_fallback(err: &GateError) -> Self {
        Self {
            allowed: true,
            reason: VerdictReason::ErrorFallback,
            usage: None,
            limits: None,
            reset_times: None,
            retry_after_secs: None,
            exceeded_window: None,
            error: Some(err.to_string()),
        }
    }

    /// 黑名单拒绝（永久，无重试时间）
    pub fn deny_blacklisted() -> Self {
        Self {
            allowed: false,
            reason: VerdictReason::Blacklisted,
            usage: None,
            limits: None,
            reset_times: None,
            retry_after_secs: None,
            exceeded_window: None,
            error: None,
        }
    }

    /// 临时封禁拒绝
    pub fn deny_blocked(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            reason: VerdictReason::TemporarilyBlocked,
            usage: None,
            limits: None,
            reset_times: None,
            retry_after_secs: Some(retry_after_secs),
            exceeded_window: None,
            error: None,
        }
    }

    /// 超限拒绝，报告首个超限窗口
    pub fn deny_rate_limited(
        usage: UsageSnapshot,
        limits: LimitSnapshot,
        reset_times: ResetTimes,
        exceeded_window: Window,
        retry_after_secs: u64,
    ) -> Self {
        Self {
            allowed: false,
            reason: VerdictReason::RateLimitExceeded,
            usage: Some(usage),
            limits: Some(limits),
            reset_times: Some(reset_times),
            retry_after_secs: Some(retry_after_secs),
            exceeded_window: Some(exceeded_window),
            error: None,
        }
    }

    /// 调用方翻译判定结果时应使用的HTTP状态码
    ///
    /// 403: 黑名单；429: 临时封禁/超限（配合Retry-After头）；200: 放行。
    pub fn http_status(&self) -> u16 {
        match self.reason {
            VerdictReason::Blacklisted => 403,
            VerdictReason::TemporarilyBlocked | VerdictReason::RateLimitExceeded => 429,
            _ => 200,
        }
    }
}

/// 管理操作结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResult {
    pub success: bool,
    pub error: Option<String>,
}

impl AdminResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(err: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for AdminResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::fail(e),
        }
    }
}
