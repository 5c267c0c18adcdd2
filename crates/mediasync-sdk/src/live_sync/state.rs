//! 连接状态管理
//!
//! 每个被跟踪的资源一份状态：
//! - 当前阶段（Connecting / Open / Reconnecting / ClosedPermanently）
//! - 自上次成功打开以来的连续重连次数
//! - 成功打开次数（用于判断是否为首次打开）
//! - 最近一次关闭码

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 连接阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// 连接中（首次）
    Connecting,
    /// 已连接
    Open,
    /// 重连中
    Reconnecting,
    /// 已永久关闭（终态）
    ClosedPermanently,
}

impl ConnectionPhase {
    pub fn is_terminal(self) -> bool {
        self == ConnectionPhase::ClosedPermanently
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionPhase::Connecting => write!(f, "连接中"),
            ConnectionPhase::Open => write!(f, "已连接"),
            ConnectionPhase::Reconnecting => write!(f, "重连中"),
            ConnectionPhase::ClosedPermanently => write!(f, "已永久关闭"),
        }
    }
}

/// 连接状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub resource_type: String,
    pub resource_id: String,
    /// 已脱敏的连接地址（不含 jwt）
    pub endpoint: String,
    pub phase: ConnectionPhase,
    /// 自上次成功打开以来的连续重连次数
    pub attempts: u32,
    /// 成功打开次数
    pub opened_count: u64,
    pub last_close_code: Option<u16>,
    /// 最近一次打开时间（UTC 毫秒时间戳）
    pub opened_at: Option<i64>,
}

impl ConnectionState {
    pub fn new(resource_type: String, resource_id: String, endpoint: String) -> Self {
        Self {
            resource_type,
            resource_id,
            endpoint,
            phase: ConnectionPhase::Connecting,
            attempts: 0,
            opened_count: 0,
            last_close_code: None,
            opened_at: None,
        }
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        format!(
            "【连接状态】{}/{} 阶段: {} 重连次数: {} 打开次数: {} 最近关闭码: {}",
            self.resource_type,
            self.resource_id,
            self.phase,
            self.attempts,
            self.opened_count,
            self.last_close_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        )
    }
}

/// 一次阶段变更
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub old: ConnectionPhase,
    pub new: ConnectionPhase,
    pub attempts: u32,
}

/// 连接状态管理器（线程安全）
#[derive(Debug, Clone)]
pub struct ConnectionStateManager {
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionStateManager {
    pub fn new(resource_type: String, resource_id: String, endpoint: String) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::new(resource_type, resource_id, endpoint))),
        }
    }

    /// 标记连接成功；返回 (阶段变更, 是否首次打开)
    pub fn mark_open(&self) -> Option<(PhaseChange, bool)> {
        let mut state = self.state.write();
        if state.phase.is_terminal() {
            return None;
        }
        let old = state.phase;
        state.phase = ConnectionPhase::Open;
        state.attempts = 0;
        state.opened_count += 1;
        state.opened_at = Some(Utc::now().timestamp_millis());
        Some((
            PhaseChange {
                old,
                new: ConnectionPhase::Open,
                attempts: 0,
            },
            state.opened_count == 1,
        ))
    }

    /// 记录一次可重连的关闭（或连接失败），重连次数加一
    pub fn mark_reconnecting(&self, close_code: Option<u16>) -> Option<PhaseChange> {
        let mut state = self.state.write();
        if state.phase.is_terminal() {
            return None;
        }
        let old = state.phase;
        state.phase = ConnectionPhase::Reconnecting;
        state.attempts = state.attempts.saturating_add(1);
        state.last_close_code = close_code;
        state.opened_at = None;
        Some(PhaseChange {
            old,
            new: ConnectionPhase::Reconnecting,
            attempts: state.attempts,
        })
    }

    /// 标记永久关闭
    pub fn mark_closed_permanently(&self, close_code: Option<u16>) -> Option<PhaseChange> {
        let mut state = self.state.write();
        if state.phase.is_terminal() {
            return None;
        }
        let old = state.phase;
        state.phase = ConnectionPhase::ClosedPermanently;
        state.last_close_code = close_code;
        state.opened_at = None;
        Some(PhaseChange {
            old,
            new: ConnectionPhase::ClosedPermanently,
            attempts: state.attempts,
        })
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.read().phase
    }

    pub fn attempts(&self) -> u32 {
        self.state.read().attempts
    }

    /// 获取当前状态快照
    pub fn get_state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// 打印状态到日志
    pub fn log_state(&self) {
        tracing::info!("{}", self.state.read().summary());
    }
}
