//! 事件系统模块 - 上传与实时同步的统一事件出口
//!
//! 功能包括：
//! - 上传状态 / 进度变更事件
//! - 连接状态变更、重连调度事件
//! - 资源缓存更新事件
//! - 异常上报事件
//! - 事件广播和订阅机制
//!
//! UI 层既可以订阅广播（`subscribe`），也可以注册同步监听器（`add_listener`）。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::live_sync::state::ConnectionPhase;
use crate::object_type::ObjectType;
use crate::store::UpdateSource;
use crate::upload::record::UploadStatus;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SDKEvent {
    /// 上传状态变更
    UploadStateChanged {
        object_id: String,
        object_type: ObjectType,
        generation: u64,
        old_status: Option<UploadStatus>,
        new_status: UploadStatus,
        timestamp: u64,
    },
    /// 上传进度（同一轮上传内单调不减）
    UploadProgress {
        object_id: String,
        generation: u64,
        progress: u8,
        timestamp: u64,
    },
    /// 上传记录被移除
    UploadRemoved {
        object_id: String,
        timestamp: u64,
    },
    /// 连接状态变更
    ConnectionStateChanged {
        resource_type: String,
        resource_id: String,
        old_phase: ConnectionPhase,
        new_phase: ConnectionPhase,
        attempts: u32,
        timestamp: u64,
    },
    /// 已安排下一次重连
    ReconnectScheduled {
        resource_type: String,
        resource_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: u64,
    },
    /// 资源缓存条目被替换
    ResourceUpdated {
        resource_type: String,
        resource_id: String,
        source: UpdateSource,
        timestamp: u64,
    },
    /// 意外错误（已上报观测端）
    ErrorReported {
        context: String,
        message: String,
        timestamp: u64,
    },
}

impl SDKEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::UploadStateChanged { .. } => "upload_state_changed",
            SDKEvent::UploadProgress { .. } => "upload_progress",
            SDKEvent::UploadRemoved { .. } => "upload_removed",
            SDKEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            SDKEvent::ReconnectScheduled { .. } => "reconnect_scheduled",
            SDKEvent::ResourceUpdated { .. } => "resource_updated",
            SDKEvent::ErrorReported { .. } => "error_reported",
        }
    }

    /// 获取事件时间戳（毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            SDKEvent::UploadStateChanged { timestamp, .. }
            | SDKEvent::UploadProgress { timestamp, .. }
            | SDKEvent::UploadRemoved { timestamp, .. }
            | SDKEvent::ConnectionStateChanged { timestamp, .. }
            | SDKEvent::ReconnectScheduled { timestamp, .. }
            | SDKEvent::ResourceUpdated { timestamp, .. }
            | SDKEvent::ErrorReported { timestamp, .. } => *timestamp,
        }
    }

    /// 事件关联的上传对象 ID
    pub fn object_id(&self) -> Option<&str> {
        match self {
            SDKEvent::UploadStateChanged { object_id, .. }
            | SDKEvent::UploadProgress { object_id, .. }
            | SDKEvent::UploadRemoved { object_id, .. } => Some(object_id),
            _ => None,
        }
    }

    /// 事件关联的资源 (type, id)
    pub fn resource(&self) -> Option<(&str, &str)> {
        match self {
            SDKEvent::ConnectionStateChanged { resource_type, resource_id, .. }
            | SDKEvent::ReconnectScheduled { resource_type, resource_id, .. }
            | SDKEvent::ResourceUpdated { resource_type, resource_id, .. } => {
                Some((resource_type, resource_id))
            }
            _ => None,
        }
    }
}

/// 事件监听器
pub type EventListener = Box<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
///
/// `emit` 为同步调用：上传进度回调运行在 HTTP 请求体的轮询路径上，不能 await。
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SDKEvent>,
    /// 事件监听器映射
    listeners: Arc<RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<RwLock<EventStats>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.sender.receiver_count())
            .field("stats", &*self.stats.read())
            .finish()
    }
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 客户端），仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        // 通用监听器
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 添加事件监听器，`event_type` 为 "*" 时监听全部事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners
            .entry(event_type.to_string())
            .or_default()
            .push(Box::new(listener));

        self.stats.write().listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(1000)
    }
}
