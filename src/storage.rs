//! 存储抽象层
//!
//! 定义通用键值存储接口、内存实现和各类持久化记录。
//!
//! 存储只承诺按键的get/put/delete与建议性TTL，不提供跨键事务。所有
//! 记录以JSON字符串落库；反序列化失败视为记录不存在，不作为硬错误。

use crate::error::StorageError;
use crate::identity::ClientIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// 违规事件在账本中的保留天数
pub const VIOLATION_RETENTION_DAYS: i64 = 30;

/// 违规摘要保留的最近事件条数上限
pub const VIOLATION_LIST_CAP: usize = 50;

/// 存储接口
///
/// TTL为建议性清理手段；时间语义由记录自身的时间戳或键中的桶标签承担。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取值
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// 设置值，`ttl`为秒
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError>;

    /// 删除值
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// 名单条目（白名单与黑名单共用同一结构）
///
/// `active=false` 的条目等同于不存在。黑名单条目没有过期时间，只能由
/// 管理操作移除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub identity: ClientIdentity,
    pub reason: String,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    pub active: bool,
}

/// 临时封禁记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub identity: ClientIdentity,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub violation_count: u64,
    pub worker: String,
    pub applied_at: DateTime<Utc>,
}

impl BlockRecord {
    /// 时间戳判定是否已过期（存储TTL只是建议，这里才是权威判断）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// 距离解封的剩余秒数
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.expires_at - now).num_seconds().max(0) as u64
    }
}

/// 违规类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// 黑名单身份仍在访问
    BlacklistAccess,
    /// 封禁期间继续叩门
    BlockedAccessAttempt,
    /// 用量超限
    RateLimitExceeded,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::BlacklistAccess => "blacklist_access",
            ViolationKind::BlockedAccessAttempt => "blocked_access_attempt",
            ViolationKind::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// 单条违规事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub identity: ClientIdentity,
    pub kind: ViolationKind,
    pub worker: String,
    pub timestamp: DateTime<Utc>,
    /// 附加上下文（触发窗口、限额等）
    pub context: serde_json::Value,
}

/// 违规摘要
///
/// 惩罚升级器读取的工作集：追加后截断到最近50条，总数单独累计。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub identity: ClientIdentity,
    pub violations: Vec<ViolationRecord>,
    pub total_count: u64,
    pub last_violation_at: Option<DateTime<Utc>>,
}

impl ViolationSummary {
    pub fn empty(identity: ClientIdentity) -> Self {
        Self {
            identity,
            violations: Vec::new(),
            total_count: 0,
            last_violation_at: None,
        }
    }

    /// 统计尾随24小时窗口内的违规条数
    pub fn count_last_24h(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::hours(24);
        self.violations
            .iter()
            .filter(|v| v.timestamp > cutoff)
            .count() as u64
    }
}

/// 内存存储条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// 内存存储实现
///
/// TTL在读取时强制检查：翻桶之后的迟到读取返回空而不是陈旧值。
pub struct MemoryStorage {
    data: dashmap::DashMap<String, MemoryEntry>,
}

impl MemoryStorage {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            data: dashmap::DashMap::new(),
        }
    }

    /// 清理过期条目，返回清理数量
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let mut count = 0;
        self.data.retain(|_, entry| {
            let keep = entry.expires_at.map(|t| t > now).unwrap_or(true);
            if !keep {
                count += 1;
            }
            keep
        });
        count
    }

    /// 当前条目数（含未清理的过期条目）
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(entry) = self.data.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    drop(entry);
                    self.data.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError> {
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }
}

/// 总是失败的存储
///
/// 用于验证引擎边界的兜底放行行为。
pub struct FailingStorage;

#[async_trait]
impl Storage for FailingStorage {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::ConnectionError("storage offline".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<u64>) -> Result<(), StorageError> {
        Err(StorageError::ConnectionError("storage offline".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::ConnectionError("storage offline".to_string()))
    }
}
