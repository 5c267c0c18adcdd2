//! 实时同步管理器：每个被跟踪的资源一条连接
//!
//! 已永久关闭的连接不再算作被跟踪，查询时即被清理。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::error::Result;
use crate::live_sync::connection::{LiveSyncConnection, LiveSyncContext};
use crate::live_sync::endpoint::build_socket_url;
use crate::live_sync::state::{ConnectionPhase, ConnectionState};
use crate::session::SessionIdentity;
use crate::store::ResourceKey;

/// 实时同步管理器
pub struct LiveSyncManager {
    ctx: LiveSyncContext,
    page_origin: Url,
    websocket_path: String,
    session: SessionIdentity,
    connections: Mutex<HashMap<ResourceKey, Arc<LiveSyncConnection>>>,
}

impl std::fmt::Debug for LiveSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSyncManager")
            .field("page_origin", &self.page_origin.as_str())
            .field("websocket_path", &self.websocket_path)
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

impl LiveSyncManager {
    pub fn new<P: Into<String>>(
        ctx: LiveSyncContext,
        page_origin: Url,
        websocket_path: P,
        session: SessionIdentity,
    ) -> Self {
        Self {
            ctx,
            page_origin,
            websocket_path: websocket_path.into(),
            session,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// 开始跟踪资源；已有存活连接时直接返回它
    pub fn watch(&self, resource_type: &str, resource_id: &str) -> Result<Arc<LiveSyncConnection>> {
        let key = ResourceKey::new(resource_type, resource_id);
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(&key) {
            if existing.phase() != ConnectionPhase::ClosedPermanently {
                return Ok(existing.clone());
            }
            info!("{} 的旧连接已永久关闭，重新建立", key);
        }

        let url = build_socket_url(
            &self.page_origin,
            &self.websocket_path,
            resource_type,
            resource_id,
            &self.session,
        )?;
        let connection = Arc::new(LiveSyncConnection::new(self.ctx.clone(), resource_type, resource_id, url));
        connection.start();
        connections.insert(key, connection.clone());
        Ok(connection)
    }

    /// 停止跟踪资源
    pub async fn unwatch(&self, resource_type: &str, resource_id: &str) -> bool {
        let removed = self
            .connections
            .lock()
            .remove(&ResourceKey::new(resource_type, resource_id));
        match removed {
            Some(connection) => {
                connection.stop().await;
                true
            }
            None => false,
        }
    }

    /// 停止所有连接
    pub async fn stop_all(&self) {
        let connections: Vec<Arc<LiveSyncConnection>> =
            self.connections.lock().drain().map(|(_, c)| c).collect();
        let count = connections.len();
        for connection in connections {
            connection.stop().await;
        }
        if count > 0 {
            info!("已停止 {} 条实时同步连接", count);
        }
    }

    pub fn state(&self, resource_type: &str, resource_id: &str) -> Option<ConnectionState> {
        let mut connections = self.connections.lock();
        prune_closed(&mut connections);
        connections
            .get(&ResourceKey::new(resource_type, resource_id))
            .map(|c| c.state())
    }

    /// 正在跟踪的资源
    pub fn watched(&self) -> Vec<ResourceKey> {
        let mut connections = self.connections.lock();
        prune_closed(&mut connections);
        connections.keys().cloned().collect()
    }
}

fn prune_closed(connections: &mut HashMap<ResourceKey, Arc<LiveSyncConnection>>) {
    connections.retain(|key, connection| {
        let alive = connection.phase() != ConnectionPhase::ClosedPermanently;
        if !alive {
            debug!("清理已永久关闭的连接: {}", key);
        }
        alive
    });
}
