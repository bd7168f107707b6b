//! 临时封禁
//!
//! 计数之前必须先过的门。存储TTL只是建议性清理；读取时以记录中的
//! `expires_at` 时间戳为权威判断，过期记录被惰性删除。

use crate::error::{GateError, StorageError};
use crate::identity::ClientIdentity;
use crate::storage::{BlockRecord, Storage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 封禁存储
pub struct BlockStore {
    storage: Arc<dyn Storage>,
}

impl BlockStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(identity: &ClientIdentity) -> String {
        format!("block:{}", identity.as_str())
    }

    /// 写入封禁记录，TTL取剩余时长
    pub async fn apply(&self, record: &BlockRecord) -> Result<(), GateError> {
        let ttl = record.remaining_secs(Utc::now()).max(1);
        let value = serde_json::to_string(record)?;
        self.storage
            .set(&Self::key(&record.identity), &value, Some(ttl))
            .await?;

        info!(
            "封禁已生效: identity={}, expires_at={}, violation_count={}",
            record.identity, record.expires_at, record.violation_count
        );
        Ok(())
    }

    /// 查询未过期的封禁记录
    ///
    /// 过期记录按时间戳判定并惰性删除；损坏记录按不存在处理。
    pub async fn current(
        &self,
        identity: &ClientIdentity,
        now: DateTime<Utc>,
    ) -> Result<Option<BlockRecord>, StorageError> {
        let key = Self::key(identity);
        let Some(raw) = self.storage.get(&key).await? else {
            return Ok(None);
        };

        let record: BlockRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("封禁记录损坏，按不存在处理 key={}: {}", key, e);
                return Ok(None);
            }
        };

        if record.is_expired(now) {
            debug!("封禁已过期，惰性删除: identity={}", identity);
            self.storage.delete(&key).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// 解除封禁
    ///
    /// # 返回
    /// - `true`: 删除了存在的记录
    /// - `false`: 没有记录可删
    pub async fn clear(&self, identity: &ClientIdentity) -> Result<bool, StorageError> {
        let key = Self::key(identity);
        let existed = self.storage.get(&key).await?.is_some();
        if existed {
            self.storage.delete(&key).await?;
            info!("封禁已手动解除: identity={}", identity);
        }
        Ok(existed)
    }
}
