//! 资源缓存 - 以 (资源类型, 资源 ID) 为键的内存对象缓存
//!
//! 只有两条写入路径：实时同步（推送消息 / 断线补偿读取）与上传完成后的乐观更新。
//! 其余使用方只读，或通过 `subscribe` 观察变更。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{MediaSyncError, Result};

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new<T: Into<String>, I: Into<String>>(resource_type: T, resource_id: I) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// 写入来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSource {
    /// 服务端推送
    LiveSync,
    /// 重连后的补偿读取
    Recovery,
    /// 上传完成后的本地乐观更新
    UploadCompletion,
}

/// 缓存变更事件
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: ResourceKey,
    pub resource: Value,
    pub source: UpdateSource,
}

/// 资源缓存接口
pub trait ResourceStore: Send + Sync + std::fmt::Debug {
    /// 读取条目快照
    fn get(&self, key: &ResourceKey) -> Option<Value>;

    /// 整体替换条目（不做合并），键取自 `resource["id"]`
    fn replace(&self, resource_type: &str, resource: Value, source: UpdateSource) -> Result<ResourceKey>;

    /// 修改已存在条目的单个字段；条目不存在时返回 false
    fn set_field(&self, key: &ResourceKey, field: &str, value: Value, source: UpdateSource) -> bool;

    /// 订阅变更
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// 从资源对象中取出 ID（字符串或数字）
pub fn resource_id_of(resource: &Value) -> Option<String> {
    match resource.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 内存实现
#[derive(Debug)]
pub struct MemoryResourceStore {
    entries: RwLock<HashMap<ResourceKey, Value>>,
    sender: broadcast::Sender<StoreEvent>,
}

impl MemoryResourceStore {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            sender,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn publish(&self, key: ResourceKey, resource: Value, source: UpdateSource) {
        debug!("资源缓存更新: {} ({:?})", key, source);
        // 没有订阅者时忽略
        let _ = self.sender.send(StoreEvent { key, resource, source });
    }
}

impl Default for MemoryResourceStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ResourceStore for MemoryResourceStore {
    fn get(&self, key: &ResourceKey) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn replace(&self, resource_type: &str, resource: Value, source: UpdateSource) -> Result<ResourceKey> {
        let resource_id = resource_id_of(&resource).ok_or_else(|| {
            MediaSyncError::InvalidArgument(format!("{} 资源缺少 id 字段", resource_type))
        })?;
        let key = ResourceKey::new(resource_type, resource_id);
        self.entries.write().insert(key.clone(), resource.clone());
        self.publish(key.clone(), resource, source);
        Ok(key)
    }

    fn set_field(&self, key: &ResourceKey, field: &str, value: Value, source: UpdateSource) -> bool {
        let updated = {
            let mut entries = self.entries.write();
            match entries.get_mut(key).and_then(Value::as_object_mut) {
                Some(object) => {
                    object.insert(field.to_string(), value);
                    Some(Value::Object(object.clone()))
                }
                None => None,
            }
        };
        match updated {
            Some(resource) => {
                self.publish(key.clone(), resource, source);
                true
            }
            None => false,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }
}
