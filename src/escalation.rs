//! 惩罚升级
//!
//! 纯函数：尾随24小时内的既有违规数 -> 封禁时长。时长表严格递增，
//! 对累犯加重处罚。24小时内违规数达到配置的ban阈值时，额外生成永久
//! 黑名单条目，只有管理操作能解除。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 首次违规封禁时长（5分钟）
pub const FIRST_OFFENSE_BLOCK_SECS: u64 = 300;

/// 第二次违规封禁时长（30分钟）
pub const SECOND_OFFENSE_BLOCK_SECS: u64 = 1800;

/// 第三次违规封禁时长（2小时）
pub const THIRD_OFFENSE_BLOCK_SECS: u64 = 7200;

/// 最大封禁时长（24小时），第四次及以上
pub const MAX_BLOCK_SECS: u64 = 86400;

/// 自动拉黑的原因文案
pub const AUTO_BAN_REASON: &str = "persistent violator - automatic ban";

/// 升级策略
///
/// 时长表可配置，默认值即生产值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// 0次既有违规
    pub first_secs: u64,
    /// 1次既有违规
    pub second_secs: u64,
    /// 2次既有违规
    pub third_secs: u64,
    /// 3次及以上既有违规（同时是上限）
    pub max_secs: u64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            first_secs: FIRST_OFFENSE_BLOCK_SECS,
            second_secs: SECOND_OFFENSE_BLOCK_SECS,
            third_secs: THIRD_OFFENSE_BLOCK_SECS,
            max_secs: MAX_BLOCK_SECS,
        }
    }
}

impl EscalationPolicy {
    /// 计算封禁时长
    ///
    /// # 参数
    /// - `prior_violations_24h`: 尾随24小时内的违规数，不含本次
    pub fn block_duration(&self, prior_violations_24h: u64) -> Duration {
        let secs = match prior_violations_24h {
            0 => self.first_secs,
            1 => self.second_secs,
            2 => self.third_secs,
            _ => self.max_secs,
        };
        Duration::from_secs(secs.min(self.max_secs))
    }
}
