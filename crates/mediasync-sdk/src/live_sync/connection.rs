//! 单资源实时同步连接
//!
//! 一个连接对应一个被跟踪的资源，由一个自有的异步循环驱动：
//! 连接 → 读取推送 → 关闭 → 按策略等待 → 重连。
//! 除首次打开外，每次打开成功后补读一次资源，覆盖断线期间丢失的推送；
//! 补读与推送读取并行进行，补读期间已收到推送时丢弃补读结果。
//! 服务端以 4003 关闭则进入 ClosedPermanently，不再建立新连接。
//! 连接句柄被释放时循环随之取消。

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{MediaSyncError, Result};
use crate::events::{EventManager, SDKEvent};
use crate::live_sync::backoff::ReconnectPolicy;
use crate::live_sync::endpoint::redact;
use crate::live_sync::state::{ConnectionPhase, ConnectionState, ConnectionStateManager, PhaseChange};
use crate::live_sync::transport::{
    ResourceFetcher, SocketConnection, SocketConnector, SocketEvent, PERMANENT_CLOSE_CODE,
};
use crate::reporting::ErrorSink;
use crate::store::{ResourceKey, ResourceStore, UpdateSource};
use crate::utils::now_millis;

/// 推送消息：资源的完整快照
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeMessage {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub resource: Value,
}

/// 连接共享的依赖
#[derive(Clone)]
pub struct LiveSyncContext {
    pub connector: Arc<dyn SocketConnector>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub store: Arc<dyn ResourceStore>,
    pub events: Arc<EventManager>,
    pub errors: ErrorSink,
    pub policy: ReconnectPolicy,
}

struct ConnectionInner {
    resource_type: String,
    resource_id: String,
    url: Url,
    ctx: LiveSyncContext,
    state: ConnectionStateManager,
    cancel: CancellationToken,
}

/// 单资源实时同步连接
pub struct LiveSyncConnection {
    inner: Arc<ConnectionInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LiveSyncConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSyncConnection")
            .field("resource_type", &self.inner.resource_type)
            .field("resource_id", &self.inner.resource_id)
            .field("phase", &self.inner.state.phase())
            .finish()
    }
}

/// 一次读取循环的结束原因
enum ReadEnd {
    Closed { code: Option<u16>, reason: String },
    Cancelled,
}

/// 读取循环中的一步
enum ReadStep {
    Event(SocketEvent),
    Recovered(Result<Value>),
    Cancelled,
}

impl LiveSyncConnection {
    pub fn new<T: Into<String>, I: Into<String>>(
        ctx: LiveSyncContext,
        resource_type: T,
        resource_id: I,
        url: Url,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource_id = resource_id.into();
        let state = ConnectionStateManager::new(resource_type.clone(), resource_id.clone(), redact(&url));
        Self {
            inner: Arc::new(ConnectionInner {
                resource_type,
                resource_id,
                url,
                ctx,
                state,
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// 启动连接循环（重复调用无效果）
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        info!(
            "🔌 启动实时同步: {}/{} -> {}",
            self.inner.resource_type,
            self.inner.resource_id,
            redact(&self.inner.url)
        );
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            if AssertUnwindSafe(run(inner.clone())).catch_unwind().await.is_err() {
                inner.ctx.errors.report(
                    "live_sync.loop",
                    &MediaSyncError::Other(format!(
                        "连接循环异常终止: {}/{}",
                        inner.resource_type, inner.resource_id
                    )),
                );
                if let Some(change) = inner.state.mark_closed_permanently(None) {
                    inner.emit_phase(change);
                }
            }
        }));
    }

    /// 停止连接循环：取消当前连接与待执行的重连
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!("连接循环结束异常: {}", e);
            }
        }
        debug!("实时同步已停止: {}/{}", self.inner.resource_type, self.inner.resource_id);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get_state()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.phase()
    }

    /// 循环是否还在运行
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn resource_type(&self) -> &str {
        &self.inner.resource_type
    }

    pub fn resource_id(&self) -> &str {
        &self.inner.resource_id
    }
}

impl Drop for LiveSyncConnection {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// 连接循环
async fn run(inner: Arc<ConnectionInner>) {
    loop {
        let connected = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            result = inner.ctx.connector.connect(&inner.url) => result,
        };

        let (code, reason) = match connected {
            Ok(mut socket) => {
                let initial = match inner.state.mark_open() {
                    Some((change, initial)) => {
                        inner.emit_phase(change);
                        initial
                    }
                    None => break,
                };
                info!("✅ 实时同步已连接: {}/{}", inner.resource_type, inner.resource_id);

                match inner.read_until_closed(socket.as_mut(), !initial).await {
                    ReadEnd::Closed { code, reason } => (code, reason),
                    ReadEnd::Cancelled => {
                        socket.close().await;
                        break;
                    }
                }
            }
            // 连接失败按异常关闭处理
            Err(e) => (None, e.to_string()),
        };

        if code == Some(PERMANENT_CLOSE_CODE) {
            warn!(
                "⚠️ 服务端拒绝 {}/{} 的实时同步（{}），不再重连",
                inner.resource_type, inner.resource_id, PERMANENT_CLOSE_CODE
            );
            if let Some(change) = inner.state.mark_closed_permanently(code) {
                inner.emit_phase(change);
            }
            break;
        }

        let attempt = match inner.state.mark_reconnecting(code) {
            Some(change) => {
                inner.emit_phase(change);
                change.attempts
            }
            None => break,
        };
        debug!(
            "连接关闭: {}/{} code={:?} reason={}",
            inner.resource_type, inner.resource_id, code, reason
        );

        if !inner.ctx.policy.allows(attempt) {
            warn!(
                "⚠️ {}/{} 重连次数已达上限 {}",
                inner.resource_type, inner.resource_id, attempt - 1
            );
            if let Some(change) = inner.state.mark_closed_permanently(code) {
                inner.emit_phase(change);
            }
            break;
        }

        let delay = inner.ctx.policy.delay_for(attempt);
        inner.ctx.events.emit(SDKEvent::ReconnectScheduled {
            resource_type: inner.resource_type.clone(),
            resource_id: inner.resource_id.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            timestamp: now_millis(),
        });
        if !inner.wait(delay).await {
            break;
        }
    }
    inner.state.log_state();
}

impl ConnectionInner {
    /// 等待下一次重连；被取消时返回 false
    async fn wait(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// 读取推送直到关闭；`recover` 为 true 时同时进行一次断线补偿读取
    async fn read_until_closed(&self, socket: &mut dyn SocketConnection, recover: bool) -> ReadEnd {
        let mut recovery = if recover {
            debug!("🔄 断线补偿读取: {}/{}", self.resource_type, self.resource_id);
            Some(self.ctx.fetcher.fetch_resource(&self.resource_type, &self.resource_id))
        } else {
            None
        };
        let own_key = ResourceKey::new(&self.resource_type, &self.resource_id);
        let mut pushed_during_recovery = false;

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => ReadStep::Cancelled,
                event = socket.next_event() => ReadStep::Event(event),
                result = async {
                    match recovery.as_mut() {
                        Some(fetch) => fetch.await,
                        None => std::future::pending().await,
                    }
                }, if recovery.is_some() => ReadStep::Recovered(result),
            };
            match step {
                ReadStep::Cancelled => return ReadEnd::Cancelled,
                ReadStep::Event(SocketEvent::Text(text)) => {
                    let applied = self.apply_message(&text);
                    if recovery.is_some() && applied.as_ref() == Some(&own_key) {
                        pushed_during_recovery = true;
                    }
                }
                ReadStep::Event(SocketEvent::Closed { code, reason }) => {
                    return ReadEnd::Closed { code, reason };
                }
                ReadStep::Recovered(result) => {
                    recovery = None;
                    self.finish_recovery(result, pushed_during_recovery);
                }
            }
        }
    }

    /// 推送消息整体替换缓存条目；无法解析的帧上报后跳过
    fn apply_message(&self, text: &str) -> Option<ResourceKey> {
        let message: ChangeMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.ctx.errors.report("live_sync.message", &MediaSyncError::from(e));
                return None;
            }
        };
        debug!("📨 收到资源推送: {}", message.resource_type);
        self.write_store(&message.resource_type, message.resource, UpdateSource::LiveSync, "live_sync.message")
    }

    /// 断线补偿结果：失败只上报，连接保持 Open；已被更新的推送覆盖时丢弃
    fn finish_recovery(&self, result: Result<Value>, superseded: bool) {
        match result {
            Ok(_) if superseded => {
                debug!("补偿读取结果已过期，丢弃: {}/{}", self.resource_type, self.resource_id);
            }
            Ok(resource) => {
                self.write_store(&self.resource_type, resource, UpdateSource::Recovery, "live_sync.recovery");
            }
            Err(e) => self.ctx.errors.report("live_sync.recovery", &e),
        }
    }

    fn write_store(
        &self,
        resource_type: &str,
        resource: Value,
        source: UpdateSource,
        context: &str,
    ) -> Option<ResourceKey> {
        match self.ctx.store.replace(resource_type, resource, source) {
            Ok(key) => {
                self.ctx.events.emit(SDKEvent::ResourceUpdated {
                    resource_type: key.resource_type.clone(),
                    resource_id: key.resource_id.clone(),
                    source,
                    timestamp: now_millis(),
                });
                Some(key)
            }
            Err(e) => {
                self.ctx.errors.report(context, &e);
                None
            }
        }
    }

    fn emit_phase(&self, change: PhaseChange) {
        debug!(
            "连接状态 {}/{}: {} -> {} (重连次数 {})",
            self.resource_type, self.resource_id, change.old, change.new, change.attempts
        );
        self.ctx.events.emit(SDKEvent::ConnectionStateChanged {
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            old_phase: change.old,
            new_phase: change.new,
            attempts: change.attempts,
            timestamp: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_sync::transport::test_support::{FakeConnector, FakeFetcher, Script};
    use crate::reporting::test_helpers::RecordingReporter;
    use crate::store::{MemoryResourceStore, StoreEvent};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tokio::sync::broadcast;

    struct Harness {
        connection: LiveSyncConnection,
        connector: Arc<FakeConnector>,
        fetcher: Arc<FakeFetcher>,
        store: Arc<MemoryResourceStore>,
        reporter: Arc<RecordingReporter>,
        events: Arc<EventManager>,
    }

    fn harness(policy: ReconnectPolicy) -> Harness {
        let connector = Arc::new(FakeConnector::default());
        let fetcher = Arc::new(FakeFetcher::default());
        let store = Arc::new(MemoryResourceStore::default());
        let reporter = Arc::new(RecordingReporter::default());
        let events = Arc::new(EventManager::new(1024));
        let ctx = LiveSyncContext {
            connector: connector.clone(),
            fetcher: fetcher.clone(),
            store: store.clone(),
            events: events.clone(),
            errors: ErrorSink::new(reporter.clone(), events.clone()),
            policy,
        };
        let url = Url::parse("ws://lms.test/ws/videos/v1/?jwt=tok").unwrap();
        Harness {
            connection: LiveSyncConnection::new(ctx, "videos", "v1", url),
            connector,
            fetcher,
            store,
            reporter,
            events,
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn close(code: u16) -> SocketEvent {
        SocketEvent::Closed {
            code: Some(code),
            reason: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_follow_policy() {
        let policy = ReconnectPolicy {
            max_attempts: Some(12),
            ..ReconnectPolicy::default()
        };
        let h = harness(policy);
        for _ in 0..13 {
            h.connector.push(Script::Refuse);
        }
        let mut rx = h.events.subscribe();
        let started = tokio::time::Instant::now();

        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::ClosedPermanently).await;

        let mut delays = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SDKEvent::ReconnectScheduled { attempt, delay_ms, .. } = event {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay_ms);
            }
        }
        assert_eq!(delays, vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 500, 500]);
        assert_eq!(h.connector.connect_count(), 13);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_indefinitely_by_default() {
        let h = harness(ReconnectPolicy::default());
        h.connection.start();

        // 脚本耗尽后每次都被拒绝
        wait_until(|| h.connector.connect_count() >= 14).await;
        assert_eq!(h.connection.phase(), ConnectionPhase::Reconnecting);
        assert!(h.connection.state().attempts >= 13);

        h.connection.stop().await;
        let count = h.connector.connect_count();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.connector.connect_count(), count);
    }

    #[tokio::test]
    async fn close_4003_is_permanent() {
        let h = harness(ReconnectPolicy::default());
        let tx = h.connector.accept();
        h.connector.accept();

        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;
        tx.send(close(PERMANENT_CLOSE_CODE)).unwrap();

        wait_until(|| !h.connection.is_running()).await;
        assert_eq!(h.connection.phase(), ConnectionPhase::ClosedPermanently);
        assert_eq!(h.connection.state().last_close_code, Some(4003));
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn gap_recovery_only_after_reopen() {
        let h = harness(ReconnectPolicy::default());
        let first = h.connector.accept();
        let _second = h.connector.accept();

        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);

        first.send(close(1006)).unwrap();
        wait_until(|| h.connection.state().opened_count == 2).await;
        wait_until(|| h.fetcher.calls.load(Ordering::SeqCst) == 1).await;

        let cached = h.store.get(&ResourceKey::new("videos", "v1")).unwrap();
        assert_eq!(cached["fetch"], 1);
        assert_eq!(h.connection.state().attempts, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn failed_recovery_keeps_connection_open() {
        let h = harness(ReconnectPolicy::default());
        h.fetcher.fail.store(true, Ordering::SeqCst);
        let first = h.connector.accept();
        let second = h.connector.accept();

        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;
        first.send(close(1001)).unwrap();
        wait_until(|| h.reporter.contexts().contains(&"live_sync.recovery".to_string())).await;

        assert_eq!(h.connection.phase(), ConnectionPhase::Open);

        // 连接仍可接收推送
        second
            .send(SocketEvent::Text(
                json!({"type": "videos", "resource": {"id": "v1", "upload_state": "ready"}}).to_string(),
            ))
            .unwrap();
        wait_until(|| h.store.get(&ResourceKey::new("videos", "v1")).is_some()).await;
    }

    #[tokio::test]
    async fn change_messages_replace_store_entries() {
        let h = harness(ReconnectPolicy::default());
        let tx = h.connector.accept();
        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;

        tx.send(SocketEvent::Text("not json".to_string())).unwrap();
        tx.send(SocketEvent::Text(
            json!({"type": "videos", "resource": {"id": "v1", "title": "a", "upload_state": "processing"}})
                .to_string(),
        ))
        .unwrap();
        tx.send(SocketEvent::Text(
            json!({"type": "videos", "resource": {"id": "v1", "upload_state": "ready"}}).to_string(),
        ))
        .unwrap();

        wait_until(|| {
            h.store
                .get(&ResourceKey::new("videos", "v1"))
                .map_or(false, |v| v["upload_state"] == "ready")
        })
        .await;

        // 整体替换，旧字段不保留
        let cached = h.store.get(&ResourceKey::new("videos", "v1")).unwrap();
        assert!(cached.get("title").is_none());
        assert_eq!(h.reporter.contexts(), vec!["live_sync.message".to_string()]);
        assert_eq!(h.connection.phase(), ConnectionPhase::Open);
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn stop_cancels_open_connection() {
        let h = harness(ReconnectPolicy::default());
        let _tx = h.connector.accept();
        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;

        h.connection.stop().await;
        assert!(!h.connection.is_running());

        // 停止后 start 不会重新启动
        h.connection.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert_eq!(h.connector.urls.lock()[0], "ws://lms.test/ws/videos/v1/?jwt=tok");
    }

    #[tokio::test]
    async fn pushes_apply_while_recovery_is_pending() {
        let h = harness(ReconnectPolicy::default());
        h.fetcher.hold.store(true, Ordering::SeqCst);
        let first = h.connector.accept();
        let second = h.connector.accept();

        h.connection.start();
        wait_until(|| h.connection.phase() == ConnectionPhase::Open).await;
        first.send(close(1006)).unwrap();
        wait_until(|| h.fetcher.calls.load(Ordering::SeqCst) == 1).await;

        // 补读挂起期间推送照常生效
        second
            .send(SocketEvent::Text(
                json!({"type": "videos", "resource": {"id": "v1", "upload_state": "ready"}}).to_string(),
            ))
            .unwrap();
        wait_until(|| {
            h.store
                .get(&ResourceKey::new("videos", "v1"))
                .map_or(false, |v| v["upload_state"] == "ready")
        })
        .await;
        assert_eq!(h.connection.phase(), ConnectionPhase::Open);

        // 迟到的补读结果不覆盖更新的推送
        h.fetcher.release.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cached = h.store.get(&ResourceKey::new("videos", "v1")).unwrap();
        assert_eq!(cached["upload_state"], "ready");
        assert!(cached.get("fetch").is_none());

        // 补读挂起时 stop 也能立即返回
        h.connection.stop().await;
        assert!(!h.connection.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_connection_cancels_loop() {
        let Harness {
            connection,
            connector,
            ..
        } = harness(ReconnectPolicy::default());
        connection.start();
        wait_until(|| connector.connect_count() >= 11).await;

        drop(connection);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let count = connector.connect_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.connect_count(), count);
    }

    #[derive(Debug)]
    struct PanickingStore;

    impl ResourceStore for PanickingStore {
        fn get(&self, _key: &ResourceKey) -> Option<Value> {
            None
        }

        fn replace(&self, _resource_type: &str, _resource: Value, _source: UpdateSource) -> Result<ResourceKey> {
            panic!("store unavailable");
        }

        fn set_field(&self, _key: &ResourceKey, _field: &str, _value: Value, _source: UpdateSource) -> bool {
            false
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn loop_panic_is_reported_and_closes_connection() {
        let connector = Arc::new(FakeConnector::default());
        let reporter = Arc::new(RecordingReporter::default());
        let events = Arc::new(EventManager::new(64));
        let ctx = LiveSyncContext {
            connector: connector.clone(),
            fetcher: Arc::new(FakeFetcher::default()),
            store: Arc::new(PanickingStore),
            events: events.clone(),
            errors: ErrorSink::new(reporter.clone(), events),
            policy: ReconnectPolicy::default(),
        };
        let url = Url::parse("ws://lms.test/ws/videos/v1/?jwt=tok").unwrap();
        let connection = LiveSyncConnection::new(ctx, "videos", "v1", url);
        let tx = connector.accept();

        connection.start();
        wait_until(|| connection.phase() == ConnectionPhase::Open).await;
        tx.send(SocketEvent::Text(json!({"type": "videos", "resource": {"id": "v1"}}).to_string()))
            .unwrap();

        wait_until(|| !connection.is_running()).await;
        assert_eq!(connection.phase(), ConnectionPhase::ClosedPermanently);
        assert!(reporter.contexts().contains(&"live_sync.loop".to_string()));
        assert_eq!(connector.connect_count(), 1);
    }
}
