//! 违规账本
//!
//! 按身份追加并汇总滥用事件。摘要是升级器读取的工作集：追加后截断
//! 到最近50条，30天前的事件被剪除；总数单独累计不受截断影响。

use crate::error::{GateError, StorageError};
use crate::identity::ClientIdentity;
use crate::storage::{
    Storage, ViolationKind, ViolationRecord, ViolationSummary, VIOLATION_LIST_CAP,
    VIOLATION_RETENTION_DAYS,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// 账本存储TTL（30天，建议性；权威剪除在追加时进行）
const LEDGER_TTL_SECS: u64 = VIOLATION_RETENTION_DAYS as u64 * 86400;

/// 违规账本
pub struct ViolationLedger {
    storage: Arc<dyn Storage>,
}

impl ViolationLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(identity: &ClientIdentity) -> String {
        format!("violations:{}", identity.as_str())
    }

    /// 读取违规摘要；缺失或损坏的记录返回空摘要
    pub async fn summary(
        &self,
        identity: &ClientIdentity,
    ) -> Result<ViolationSummary, StorageError> {
        let key = Self::key(identity);
        let raw = self.storage.get(&key).await?;
        Ok(raw
            .and_then(|v| match serde_json::from_str(&v) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!("违规摘要损坏，按空处理 key={}: {}", key, e);
                    None
                }
            })
            .unwrap_or_else(|| ViolationSummary::empty(identity.clone())))
    }

    /// 追加一条违规并返回更新后的摘要
    pub async fn record(
        &self,
        identity: &ClientIdentity,
        kind: ViolationKind,
        worker: &str,
        context: serde_json::Value,
    ) -> Result<ViolationSummary, GateError> {
        self.record_at(identity, kind, worker, context, Utc::now())
            .await
    }

    /// 以指定时间追加（测试注入时钟用）
    pub async fn record_at(
        &self,
        identity: &ClientIdentity,
        kind: ViolationKind,
        worker: &str,
        context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ViolationSummary, GateError> {
        let mut summary = self.summary(identity).await?;

        summary.violations.push(ViolationRecord {
            identity: identity.clone(),
            kind,
            worker: worker.to_string(),
            timestamp: now,
            context,
        });
        summary.total_count += 1;
        summary.last_violation_at = Some(now);

        // 剪除过期事件，再截断到容量上限（保留最近的）
        let cutoff = now - chrono::Duration::days(VIOLATION_RETENTION_DAYS);
        summary.violations.retain(|v| v.timestamp > cutoff);
        if summary.violations.len() > VIOLATION_LIST_CAP {
            let drop = summary.violations.len() - VIOLATION_LIST_CAP;
            summary.violations.drain(0..drop);
        }

        let value = serde_json::to_string(&summary)?;
        self.storage
            .set(&Self::key(identity), &value, Some(LEDGER_TTL_SECS))
            .await?;

        debug!(
            "违规已记录: identity={}, kind={}, 24h内={}",
            identity,
            kind.as_str(),
            summary.count_last_24h(now)
        );
        Ok(summary)
    }
}
