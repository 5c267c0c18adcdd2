//! 时间工具
//!
//! 事件与状态里的时间字段统一为 UTC 毫秒时间戳。

use chrono::Utc;

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
