//! 时间窗口与桶标签
//!
//! 用量计数按（身份, 工作器, 窗口, 桶标签）四元组分桶。桶标签是纯函数
//! 生成的日历对齐字符串，窗口语义完全由标签决定，存储TTL只负责清理。
//!
//! 周窗口使用ISO-8601周编号（周一为一周起点，年份取ISO周年），避免
//! 跨年时出现歧义标签。

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 小时桶TTL（2小时）
pub const HOURLY_TTL_SECS: u64 = 2 * 3600;

/// 天桶TTL（25小时）
pub const DAILY_TTL_SECS: u64 = 25 * 3600;

/// 周桶TTL（8天）
pub const WEEKLY_TTL_SECS: u64 = 8 * 86400;

/// 月桶TTL（32天）
pub const MONTHLY_TTL_SECS: u64 = 32 * 86400;

/// 用量统计窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Window {
    /// 固定判定顺序：hourly → daily → weekly → monthly
    ///
    /// 超限检查按此顺序短路，保证报告的超限窗口是确定的。
    pub const ALL: [Window; 4] = [
        Window::Hourly,
        Window::Daily,
        Window::Weekly,
        Window::Monthly,
    ];

    /// 窗口名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Hourly => "hourly",
            Window::Daily => "daily",
            Window::Weekly => "weekly",
            Window::Monthly => "monthly",
        }
    }

    /// 对应计数器的存储TTL（秒），恒大于窗口长度
    pub fn ttl_secs(&self) -> u64 {
        match self {
            Window::Hourly => HOURLY_TTL_SECS,
            Window::Daily => DAILY_TTL_SECS,
            Window::Weekly => WEEKLY_TTL_SECS,
            Window::Monthly => MONTHLY_TTL_SECS,
        }
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成日历对齐的桶标签
///
/// - hourly: `YYYY-MM-DD:HH`
/// - daily: `YYYY-MM-DD`
/// - weekly: `YYYY-Www`（ISO周，年份为ISO周年）
/// - monthly: `YYYY-MM`
pub fn bucket_label(window: Window, instant: DateTime<Utc>) -> String {
    match window {
        Window::Hourly => instant.format("%Y-%m-%d:%H").to_string(),
        Window::Daily => instant.format("%Y-%m-%d").to_string(),
        Window::Weekly => {
            let iso = instant.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        Window::Monthly => instant.format("%Y-%m").to_string(),
    }
}

/// 生成用量计数器的存储键
pub fn counter_key(identity: &str, worker: &str, window: Window, instant: DateTime<Utc>) -> String {
    format!(
        "usage:{}:{}:{}:{}",
        identity,
        worker,
        window.as_str(),
        bucket_label(window, instant)
    )
}

/// 计算窗口的下一次重置时间（下一个桶边界）
pub fn reset_time(window: Window, now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    match window {
        Window::Hourly => {
            let floor = date.and_hms_opt(now.hour(), 0, 0).unwrap().and_utc();
            floor + Duration::hours(1)
        }
        Window::Daily => date.and_hms_opt(0, 0, 0).unwrap().and_utc() + Duration::days(1),
        Window::Weekly => {
            let days_from_monday = date.weekday().num_days_from_monday() as i64;
            let monday = date - Duration::days(days_from_monday);
            (monday + Duration::days(7))
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        }
        Window::Monthly => {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            // 每月1日必然存在
            NaiveDate::from_ymd_opt(year, month, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        }
    }
}

/// 按窗口的用量快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub hourly: u64,
    pub daily: u64,
    pub weekly: u64,
    pub monthly: u64,
}

impl UsageSnapshot {
    pub fn get(&self, window: Window) -> u64 {
        match window {
            Window::Hourly => self.hourly,
            Window::Daily => self.daily,
            Window::Weekly => self.weekly,
            Window::Monthly => self.monthly,
        }
    }

    pub fn set(&mut self, window: Window, value: u64) {
        match window {
            Window::Hourly => self.hourly = value,
            Window::Daily => self.daily = value,
            Window::Weekly => self.weekly = value,
            Window::Monthly => self.monthly = value,
        }
    }
}

/// 按窗口的限额快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub hourly: u64,
    pub daily: u64,
    pub weekly: u64,
    pub monthly: u64,
}

impl LimitSnapshot {
    pub fn get(&self, window: Window) -> u64 {
        match window {
            Window::Hourly => self.hourly,
            Window::Daily => self.daily,
            Window::Weekly => self.weekly,
            Window::Monthly => self.monthly,
        }
    }
}

/// 按窗口的重置时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTimes {
    pub hourly: DateTime<Utc>,
    pub daily: DateTime<Utc>,
    pub weekly: DateTime<Utc>,
    pub monthly: DateTime<Utc>,
}

impl ResetTimes {
    /// 以给定时刻计算所有窗口的下一次重置时间
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            hourly: reset_time(Window::Hourly, now),
            daily: reset_time(Window::Daily, now),
            weekly: reset_time(Window::Weekly, now),
            monthly: reset_time(Window::Monthly, now),
        }
    }
}
