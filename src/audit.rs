//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 变更日志
//!
//! 名单增删、封禁生效/解除、自动拉黑都会产出一条变更事件，交给外部
//! 收集器。默认实现只写tracing日志；需要落库或上报的部署方自行实现
//! [`AuditSink`]。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// 变更事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type")]
pub enum AuditEvent {
    /// 名单变更
    ListChange {
        timestamp: DateTime<Utc>,
        list: String,
        action: String,
        identity: String,
        reason: String,
        operator: String,
    },
    /// 封禁变更
    BlockChange {
        timestamp: DateTime<Utc>,
        action: String,
        identity: String,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// 自动拉黑（达到ban阈值）
    AutoBan {
        timestamp: DateTime<Utc>,
        identity: String,
        violations_24h: u64,
    },
}

/// 变更事件收集器
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// 敏感数据脱敏
///
/// IPv4保留前两段，其余掩码；非IP身份原样返回。
fn sanitize_identity(identity: &str) -> String {
    if identity.contains('.') && identity.parse::<std::net::IpAddr>().is_ok() {
        let parts: Vec<&str> = identity.split('.').collect();
        if parts.len() == 4 {
            return format!("{}.{}.xxx.xxx", parts[0], parts[1]);
        }
    }
    identity.to_string()
}

/// 默认收集器：结构化写入tracing日志
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let masked = match &event {
            AuditEvent::ListChange { identity, .. }
            | AuditEvent::BlockChange { identity, .. }
            | AuditEvent::AutoBan { identity, .. } => sanitize_identity(identity),
        };
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        // 关联ID便于下游日志管道去重与追踪
        info!(
            event_id = %uuid::Uuid::new_v4(),
            identity = %masked,
            "audit: {}",
            payload
        );
    }
}

/// 内存收集器（测试用）
#[derive(Default)]
pub struct MemoryAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
