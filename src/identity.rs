//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 客户端身份解析
//!
//! 从请求元数据推导稳定的客户端身份（IP地址）。支持从可信代理头按
//! 优先级提取，失败时回退到连接地址。
//!
//! # 安全说明
//!
//! X-Forwarded-For 头可能被客户端伪造，NAT/代理链后的IP也不唯一。
//! 解析出的身份只用于用量分桶与惩罚追踪，不能单独作为安全边界。

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// 客户端身份（不透明字符串，当前为IP地址）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 请求元数据
///
/// 简化的HTTP请求表示，包含解析身份所需的信息。
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// HTTP头
    pub headers: HashMap<String, String>,
    /// 连接层的远端地址
    pub remote_addr: Option<String>,
    /// 请求路径
    pub path: String,
    /// 请求方法
    pub method: String,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置HTTP头（链式）
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// 设置远端地址（链式）
    pub fn with_remote_addr(mut self, addr: &str) -> Self {
        self.remote_addr = Some(addr.to_string());
        self
    }

    /// 按名称查找HTTP头（忽略大小写）
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 身份解析器
///
/// 按优先级从可信代理头提取客户端IP，全部失败时回退到连接地址。
pub struct IdentityResolver {
    /// 可信HTTP头名称列表（按优先级顺序）
    trusted_headers: Vec<String>,
    /// 是否验证IP格式
    validate: bool,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(vec!["X-Real-IP", "X-Forwarded-For", "CF-Connecting-IP"])
    }
}

impl IdentityResolver {
    /// 创建身份解析器
    ///
    /// # 参数
    /// - `trusted_headers`: 可信HTTP头名称列表（按优先级顺序）
    pub fn new(trusted_headers: Vec<&str>) -> Self {
        Self {
            trusted_headers: trusted_headers.iter().map(|s| s.to_string()).collect(),
            validate: true,
        }
    }

    /// 不校验IP格式的解析器（测试或非IP身份场景）
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// 解析客户端身份
    ///
    /// # 返回
    /// - `Some(ClientIdentity)`: 解析成功
    /// - `None`: 所有来源都无法产生有效身份
    pub fn resolve(&self, meta: &RequestMeta) -> Option<ClientIdentity> {
        for header in &self.trusted_headers {
            if let Some(value) = meta.get_header(header) {
                if let Some(ip) = self.parse_ip(value) {
                    return Some(ClientIdentity(ip));
                }
            }
        }

        if let Some(addr) = &meta.remote_addr {
            if let Some(ip) = self.parse_ip(addr) {
                return Some(ClientIdentity(ip));
            }
        }

        None
    }

    /// 解析IP地址（支持单个IP和逗号分隔的IP列表）
    ///
    /// X-Forwarded-For 列表格式为 `client, proxy1, proxy2`：第一个代理
    /// 把真实客户端IP放在最左侧，后续代理向右追加。取最左侧的合法IP。
    fn parse_ip(&self, value: &str) -> Option<String> {
        let candidate = value.split(',').map(|s| s.trim()).find(|s| !s.is_empty())?;

        // 连接地址可能带端口（1.2.3.4:5678），剥离后再验证
        let bare = candidate
            .rsplit_once(':')
            .filter(|(host, port)| {
                host.contains('.') && port.chars().all(|c| c.is_ascii_digit())
            })
            .map(|(host, _)| host)
            .unwrap_or(candidate);

        if self.validate && bare.parse::<IpAddr>().is_err() {
            return None;
        }

        Some(bare.to_string())
    }
}
