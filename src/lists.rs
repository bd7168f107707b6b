//! 名单管理
//!
//! 白名单与黑名单的CRUD操作。两类名单都没有TTL，只能由管理操作
//! 增删；`active=false` 的条目视同不存在。
//!
//! 活跃黑名单条目意味着永久无条件拒绝；活跃白名单条目无条件放行并
//! 跳过所有计数。

use crate::error::{GateError, StorageError};
use crate::identity::ClientIdentity;
use crate::storage::{ListEntry, Storage};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 名单原因最大长度
pub const MAX_LIST_REASON_LENGTH: usize = 500;

/// 名单类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// 白名单
    Allow,
    /// 黑名单
    Deny,
}

impl ListKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            ListKind::Allow => "allowlist",
            ListKind::Deny => "denylist",
        }
    }

    /// 名单条目的存储键
    pub fn key(&self, identity: &ClientIdentity) -> String {
        format!("{}:{}", self.key_prefix(), identity.as_str())
    }
}

/// 校验名单操作入参
fn validate_entry_input(reason: &str, added_by: &str) -> Result<(), GateError> {
    if reason.is_empty() {
        return Err(GateError::ValidationError("原因不能为空".to_string()));
    }
    if reason.len() > MAX_LIST_REASON_LENGTH {
        return Err(GateError::ValidationError(format!(
            "原因过长，最大长度为 {} 字符",
            MAX_LIST_REASON_LENGTH
        )));
    }
    if added_by.is_empty() {
        return Err(GateError::ValidationError("操作人不能为空".to_string()));
    }
    Ok(())
}

/// 名单存储
pub struct ListStore {
    storage: Arc<dyn Storage>,
}

impl ListStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// 添加名单条目
    pub async fn add(
        &self,
        kind: ListKind,
        identity: &ClientIdentity,
        reason: &str,
        added_by: &str,
    ) -> Result<ListEntry, GateError> {
        validate_entry_input(reason, added_by)?;

        let entry = ListEntry {
            identity: identity.clone(),
            reason: reason.to_string(),
            added_by: added_by.to_string(),
            added_at: Utc::now(),
            active: true,
        };
        let value = serde_json::to_string(&entry)?;
        self.storage.set(&kind.key(identity), &value, None).await?;

        info!(
            "名单条目已添加: kind={:?}, identity={}, added_by={}",
            kind, identity, added_by
        );
        Ok(entry)
    }

    /// 移除名单条目（置为不活跃）
    ///
    /// # 返回
    /// - `true`: 找到并停用了条目
    /// - `false`: 条目不存在
    pub async fn remove(
        &self,
        kind: ListKind,
        identity: &ClientIdentity,
    ) -> Result<bool, GateError> {
        let key = kind.key(identity);
        let Some(mut entry) = self.read_entry(&key).await? else {
            debug!("移除时未找到名单条目: {}", key);
            return Ok(false);
        };

        entry.active = false;
        let value = serde_json::to_string(&entry)?;
        self.storage.set(&key, &value, None).await?;

        info!("名单条目已停用: kind={:?}, identity={}", kind, identity);
        Ok(true)
    }

    /// 查询活跃名单条目
    ///
    /// 不活跃条目等同不存在。
    pub async fn check(
        &self,
        kind: ListKind,
        identity: &ClientIdentity,
    ) -> Result<Option<ListEntry>, StorageError> {
        let key = kind.key(identity);
        let raw = self.storage.get(&key).await?;
        Ok(raw
            .and_then(|v| parse_entry(&key, &v))
            .filter(|e| e.active))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<ListEntry>, StorageError> {
        let raw = self.storage.get(key).await?;
        Ok(raw.and_then(|v| parse_entry(key, &v)))
    }
}

/// 解析名单条目；损坏的记录视为不存在
fn parse_entry(key: &str, raw: &str) -> Option<ListEntry> {
    match serde_json::from_str(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("名单记录损坏，按不存在处理 key={}: {}", key, e);
            None
        }
    }
}
