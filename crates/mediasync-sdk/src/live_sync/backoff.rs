//! 重连策略
//!
//! 前 `immediate_attempts` 次重连不等待，之后每次固定等待 `fixed_delay_ms`。
//! 默认不设总次数上限，只有服务端以 4003 关闭才会停止重连。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重连策略配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// 立即重连的次数
    pub immediate_attempts: u32,
    /// 之后每次重连前的固定等待（毫秒）
    pub fixed_delay_ms: u64,
    /// 重连次数上限（None 表示不限）
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            immediate_attempts: 10,
            fixed_delay_ms: 500,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次重连（从 1 开始）前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= self.immediate_attempts {
            Duration::ZERO
        } else {
            Duration::from_millis(self.fixed_delay_ms)
        }
    }

    /// 是否还允许第 `attempt` 次重连
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=12).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 500, 500]);
        assert_eq!(policy.delay_for(10_000), Duration::from_millis(500));
    }

    #[test]
    fn unbounded_unless_capped() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(u32::MAX));

        let capped = ReconnectPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(capped.allows(3));
        assert!(!capped.allows(4));
    }

    #[test]
    fn deserializes_partial_config() {
        let policy: ReconnectPolicy = serde_json::from_str(r#"{"fixed_delay_ms": 1000}"#).unwrap();
        assert_eq!(policy.immediate_attempts, 10);
        assert_eq!(policy.fixed_delay_ms, 1000);
        assert_eq!(policy.max_attempts, None);
    }
}
