//! 上传编排器
//!
//! 每个 object_id 一条上传记录，一轮上传的流程：
//! 申请凭证 → Transferring → 执行上传 → Succeeded / TransferFailed（或直接 PolicyFailed）。
//!
//! 对同一 object_id 再次 add_upload 会取代正在进行的一轮：旧任务被中止，
//! 旧代次的任何迟到回调都会在 `apply_*` 里因代次不匹配而被丢弃。
//! 失败不会自动重试，重试就是调用方再发起一次 add_upload。

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaSyncError, Result};
use crate::events::{EventManager, SDKEvent};
use crate::object_type::ObjectType;
use crate::reporting::ErrorSink;
use crate::store::{ResourceKey, ResourceStore, UpdateSource};
use crate::upload::policy::PolicyClient;
use crate::upload::progress::ProgressCallback;
use crate::upload::record::{UploadFailure, UploadFile, UploadRecord, UploadStatus};
use crate::upload::transfer::{TransferExecutor, TransferOutcome, TransferRequest};
use crate::utils::now_millis;

/// 上传成功后写入缓存的乐观状态
pub const PROCESSING_UPLOAD_STATE: &str = "processing";

struct UploadEntry {
    record: UploadRecord,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct OrchestratorState {
    records: HashMap<String, UploadEntry>,
    next_generation: u64,
}

struct OrchestratorInner {
    policy_client: Arc<dyn PolicyClient>,
    executor: Arc<dyn TransferExecutor>,
    store: Option<Arc<dyn ResourceStore>>,
    events: Arc<EventManager>,
    errors: ErrorSink,
    state: Mutex<OrchestratorState>,
    running: AtomicBool,
}

/// 最后一个编排器句柄释放时中止所有进行中的上传
struct OwnerGuard {
    inner: Weak<OrchestratorInner>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let aborted = inner.abort_all();
            if aborted > 0 {
                debug!("编排器已释放，中止 {} 个上传任务", aborted);
            }
        }
    }
}

/// 上传编排器（可 clone，内部共享状态）
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<OrchestratorInner>,
    _owner: Arc<OwnerGuard>,
}

impl std::fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("records", &self.inner.state.lock().records.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl UploadOrchestrator {
    pub fn new(
        policy_client: Arc<dyn PolicyClient>,
        executor: Arc<dyn TransferExecutor>,
        events: Arc<EventManager>,
        errors: ErrorSink,
    ) -> Self {
        Self::from_inner(Arc::new(OrchestratorInner {
            policy_client,
            executor,
            store: None,
            events,
            errors,
            state: Mutex::new(OrchestratorState::default()),
            running: AtomicBool::new(false),
        }))
    }

    fn from_inner(inner: Arc<OrchestratorInner>) -> Self {
        let owner = Arc::new(OwnerGuard {
            inner: Arc::downgrade(&inner),
        });
        Self { inner, _owner: owner }
    }

    /// 挂接资源缓存，用于上传成功后的乐观更新（需在 start 之前调用）
    pub fn with_store(self, store: Arc<dyn ResourceStore>) -> Self {
        let Self { inner, _owner } = self;
        match Arc::try_unwrap(inner) {
            Ok(mut inner) => {
                inner.store = Some(store);
                Self::from_inner(Arc::new(inner))
            }
            Err(inner) => {
                warn!("⚠️ 编排器已被共享，忽略 with_store");
                Self { inner, _owner }
            }
        }
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        info!("✅ 上传编排器已启动");
    }

    /// 停止：中止所有进行中的上传，移除未到终态的记录；终态记录保留供 UI 展示
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let removed: Vec<String> = {
            let mut state = self.inner.state.lock();
            let active: Vec<String> = state
                .records
                .iter()
                .filter(|(_, entry)| !entry.record.status.is_terminal())
                .map(|(id, _)| id.clone())
                .collect();
            abort_tasks(&mut state);
            for id in &active {
                state.records.remove(id);
            }
            active
        };
        for object_id in removed {
            self.inner.emit_removed(object_id);
        }
        info!("上传编排器已停止");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 创建或取代 object_id 的上传记录，并开始处理。返回新记录的代次。
    pub fn add_upload<S: Into<String>>(
        &self,
        object_type: ObjectType,
        object_id: S,
        file: UploadFile,
    ) -> Result<u64> {
        if !self.is_running() {
            return Err(MediaSyncError::NotInitialized("上传编排器未启动".to_string()));
        }
        let object_id = object_id.into();
        if object_id.is_empty() {
            return Err(MediaSyncError::InvalidArgument("object_id 不能为空".to_string()));
        }

        let generation = {
            let mut state = self.inner.state.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            let record = UploadRecord::new(object_id.clone(), object_type, file.clone(), generation);
            let previous = state
                .records
                .insert(object_id.clone(), UploadEntry { record, task: None });
            if let Some(previous) = previous {
                if let Some(task) = previous.task {
                    task.abort();
                }
                debug!(
                    "上传 {} 被取代: 代次 {} -> {}",
                    object_id, previous.record.generation, generation
                );
            }
            generation
        };

        info!("📤 新建上传: {} {} ({}) 代次 {}", object_type, object_id, file.name, generation);
        self.inner.events.emit(SDKEvent::UploadStateChanged {
            object_id: object_id.clone(),
            object_type,
            generation,
            old_status: None,
            new_status: UploadStatus::Initializing,
            timestamp: now_millis(),
        });

        let inner = self.inner.clone();
        let cycle_id = object_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(run_cycle(inner.clone(), cycle_id.clone(), object_type, file, generation))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                inner.errors.report(
                    "upload.cycle",
                    &MediaSyncError::Other(format!("上传任务异常终止: {}", cycle_id)),
                );
                let failure = UploadFailure::network(&MediaSyncError::Other("upload task panicked".to_string()));
                inner.transition(&cycle_id, generation, UploadStatus::TransferFailed, Some(failure));
            }
        });

        {
            let mut state = self.inner.state.lock();
            match state.records.get_mut(&object_id) {
                Some(entry) if entry.record.generation == generation => entry.task = Some(handle),
                // 已被再次取代或重置
                _ => handle.abort(),
            }
        }

        Ok(generation)
    }

    /// 移除 object_id 的记录；已上传到存储的对象不受影响
    pub fn reset_upload(&self, object_id: &str) -> bool {
        let removed = self.inner.state.lock().records.remove(object_id);
        match removed {
            Some(entry) => {
                if let Some(task) = entry.task {
                    task.abort();
                }
                debug!("上传记录已重置: {}", object_id);
                self.inner.emit_removed(object_id.to_string());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, object_id: &str) -> Option<UploadRecord> {
        self.inner
            .state
            .lock()
            .records
            .get(object_id)
            .map(|entry| entry.record.clone())
    }

    /// 所有记录的快照
    pub fn snapshot(&self) -> Vec<UploadRecord> {
        self.inner
            .state
            .lock()
            .records
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.inner.events.subscribe()
    }
}

/// 一轮上传
async fn run_cycle(
    inner: Arc<OrchestratorInner>,
    object_id: String,
    object_type: ObjectType,
    file: UploadFile,
    generation: u64,
) {
    let policy = match inner.policy_client.initiate_upload(object_type, &object_id, &file).await {
        Ok(policy) => policy,
        Err(e) => {
            warn!("⚠️ 获取上传凭证失败: {} {}: {}", object_type, object_id, e);
            inner.transition(&object_id, generation, UploadStatus::PolicyFailed, Some(UploadFailure::policy(&e)));
            return;
        }
    };

    if !inner.transition(&object_id, generation, UploadStatus::Transferring, None) {
        return;
    }

    let request = TransferRequest::new(
        policy.url,
        policy.fields,
        object_type.requires_content_type(),
        file,
    );
    let progress_inner = inner.clone();
    let progress_id = object_id.clone();
    let on_progress: ProgressCallback = Arc::new(move |percent| {
        progress_inner.apply_progress(&progress_id, generation, percent);
    });

    match inner.executor.transfer(request, on_progress).await {
        TransferOutcome::Succeeded => {
            if inner.transition(&object_id, generation, UploadStatus::Succeeded, None) {
                inner.mark_processing(object_type, &object_id);
            }
        }
        TransferOutcome::Failed(failure) => {
            warn!("⚠️ 上传失败: {} {}: {}", object_type, object_id, failure.message);
            inner.transition(&object_id, generation, UploadStatus::TransferFailed, Some(failure));
        }
    }
}

fn abort_tasks(state: &mut OrchestratorState) -> usize {
    let mut aborted = 0;
    for entry in state.records.values_mut() {
        if let Some(task) = entry.task.take() {
            task.abort();
            aborted += 1;
        }
    }
    aborted
}

impl OrchestratorInner {
    fn abort_all(&self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        abort_tasks(&mut self.state.lock())
    }

    /// 仅当记录仍属于 `generation` 且迁移合法时生效
    fn transition(
        &self,
        object_id: &str,
        generation: u64,
        next: UploadStatus,
        failure: Option<UploadFailure>,
    ) -> bool {
        let (object_type, old, completed_progress) = {
            let mut state = self.state.lock();
            let entry = match state.records.get_mut(object_id) {
                Some(entry) if entry.record.generation == generation => entry,
                _ => {
                    debug!("忽略过期回调: {} 代次 {} -> {:?}", object_id, generation, next);
                    return false;
                }
            };
            let record = &mut entry.record;
            if !record.status.can_transition_to(next) {
                warn!("⚠️ 非法状态迁移 {}: {:?} -> {:?}", object_id, record.status, next);
                return false;
            }
            let old = record.status;
            record.status = next;
            record.error = failure;
            let completed_progress = next == UploadStatus::Succeeded && record.progress < 100;
            if next == UploadStatus::Succeeded {
                record.progress = 100;
            }
            record.updated_at = now_millis();
            if next.is_terminal() {
                entry.task = None;
            }
            (record.object_type, old, completed_progress)
        };

        info!("上传 {} 状态: {} -> {}", object_id, old, next);
        self.events.emit(SDKEvent::UploadStateChanged {
            object_id: object_id.to_string(),
            object_type,
            generation,
            old_status: Some(old),
            new_status: next,
            timestamp: now_millis(),
        });
        if completed_progress {
            self.events.emit(SDKEvent::UploadProgress {
                object_id: object_id.to_string(),
                generation,
                progress: 100,
                timestamp: now_millis(),
            });
        }
        true
    }

    /// 进度只在 Transferring 阶段且严格增大时写入
    fn apply_progress(&self, object_id: &str, generation: u64, percent: u8) -> bool {
        let percent = percent.min(100);
        {
            let mut state = self.state.lock();
            let record = match state.records.get_mut(object_id) {
                Some(entry) if entry.record.generation == generation => &mut entry.record,
                _ => return false,
            };
            if record.status != UploadStatus::Transferring || percent <= record.progress {
                return false;
            }
            record.progress = percent;
            record.updated_at = now_millis();
        }
        self.events.emit(SDKEvent::UploadProgress {
            object_id: object_id.to_string(),
            generation,
            progress: percent,
            timestamp: now_millis(),
        });
        true
    }

    fn mark_processing(&self, object_type: ObjectType, object_id: &str) {
        if let Some(store) = &self.store {
            let key = ResourceKey::new(object_type.as_str(), object_id);
            if store.set_field(&key, "upload_state", json!(PROCESSING_UPLOAD_STATE), UpdateSource::UploadCompletion) {
                debug!("缓存中 {} 已标记为 processing", key);
            }
        }
    }

    fn emit_removed(&self, object_id: String) {
        self.events.emit(SDKEvent::UploadRemoved {
            object_id,
            timestamp: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::TracingErrorReporter;
    use crate::store::MemoryResourceStore;
    use crate::upload::policy::UploadPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// 按文件名决定行为的假凭证服务
    #[derive(Default)]
    struct FakePolicyClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PolicyClient for FakePolicyClient {
        async fn initiate_upload(
            &self,
            _object_type: ObjectType,
            _object_id: &str,
            file: &UploadFile,
        ) -> Result<UploadPolicy> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if file.name.starts_with("deny") {
                return Err(MediaSyncError::Http {
                    status: 403,
                    body: r#"{"detail":"not allowed"}"#.to_string(),
                });
            }
            Ok(UploadPolicy::new(
                "https://store/x",
                vec![("key".to_string(), "k".to_string())],
            ))
        }
    }

    /// 记录所有请求的假执行器
    ///
    /// - 文件名以 "slow" 开头：永不返回
    /// - 以 "fail" 开头：返回拒绝
    /// - 以 "jitter" 开头：回报乱序进度
    #[derive(Default)]
    struct FakeExecutor {
        requests: parking_lot::Mutex<Vec<TransferRequest>>,
    }

    impl FakeExecutor {
        fn destinations(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.destination.clone()).collect()
        }
    }

    #[async_trait]
    impl TransferExecutor for FakeExecutor {
        async fn transfer(&self, request: TransferRequest, on_progress: ProgressCallback) -> TransferOutcome {
            let name = request.file.name.clone();
            self.requests.lock().push(request);
            on_progress(0);
            if name.starts_with("slow") {
                on_progress(10);
                std::future::pending::<()>().await;
            }
            if name.starts_with("fail") {
                on_progress(40);
                return TransferOutcome::Failed(UploadFailure::rejected(
                    413,
                    r#"{"file":["too large"]}"#.to_string(),
                ));
            }
            if name.starts_with("jitter") {
                for p in [30, 20, 60, 60, 55, 90] {
                    on_progress(p);
                }
            } else {
                for p in [25, 50, 75] {
                    on_progress(p);
                }
            }
            on_progress(100);
            TransferOutcome::Succeeded
        }
    }

    struct Harness {
        orchestrator: UploadOrchestrator,
        policy: Arc<FakePolicyClient>,
        executor: Arc<FakeExecutor>,
        store: Arc<MemoryResourceStore>,
    }

    fn harness() -> Harness {
        let events = Arc::new(EventManager::new(256));
        let errors = ErrorSink::new(Arc::new(TracingErrorReporter), events.clone());
        let policy = Arc::new(FakePolicyClient::default());
        let executor = Arc::new(FakeExecutor::default());
        let store = Arc::new(MemoryResourceStore::default());
        let orchestrator = UploadOrchestrator::new(policy.clone(), executor.clone(), events, errors)
            .with_store(store.clone());
        orchestrator.start();
        Harness {
            orchestrator,
            policy,
            executor,
            store,
        }
    }

    fn file(name: &str) -> UploadFile {
        UploadFile::from_bytes(name, "video/mp4", vec![0u8; 16])
    }

    async fn wait_for_status(orchestrator: &UploadOrchestrator, id: &str, status: UploadStatus) -> UploadRecord {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = orchestrator.get(id) {
                    if record.status == status {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for upload status")
    }

    #[tokio::test]
    async fn end_to_end_video_upload_succeeds() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("clip.mp4"))
            .unwrap();

        let record = wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;
        assert_eq!(record.progress, 100);
        assert!(record.error.is_none());
        assert_eq!(h.executor.destinations(), vec!["https://store/x".to_string()]);

        let request = h.executor.requests.lock()[0].clone();
        assert!(request.include_content_type);
        assert_eq!(request.fields, vec![("key".to_string(), "k".to_string())]);
    }

    #[tokio::test]
    async fn transitions_are_ordered() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("clip.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SDKEvent::UploadStateChanged { new_status, .. } = event {
                statuses.push(new_status);
            }
        }
        assert_eq!(
            statuses,
            vec![UploadStatus::Initializing, UploadStatus::Transferring, UploadStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn second_add_supersedes_first() {
        let h = harness();
        let first = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("slow-f1.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Transferring).await;

        let second = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("f2.mp4"))
            .unwrap();
        assert!(second > first);

        let record = wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;
        assert_eq!(record.file.name, "f2.mp4");
        assert_eq!(record.generation, second);
        assert_eq!(h.orchestrator.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn stale_generation_callbacks_are_ignored() {
        let h = harness();
        let first = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("slow-f1.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Transferring).await;
        let second = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("f2.mp4"))
            .unwrap();
        let done = wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;

        // 模拟第一轮的迟到回调
        let inner = &h.orchestrator.inner;
        assert!(!inner.apply_progress("v1", first, 100));
        assert!(!inner.transition(
            "v1",
            first,
            UploadStatus::TransferFailed,
            Some(UploadFailure::rejected(500, "late".to_string()))
        ));

        let record = h.orchestrator.get("v1").unwrap();
        assert_eq!(record.status, UploadStatus::Succeeded);
        assert_eq!(record.generation, second);
        assert_eq!(record.updated_at, done.updated_at);
    }

    #[tokio::test]
    async fn policy_failure_is_terminal_and_skips_transfer() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::Documents, "d1", file("deny.pdf"))
            .unwrap();

        let record = wait_for_status(&h.orchestrator, "d1", UploadStatus::PolicyFailed).await;
        let failure = record.error.unwrap();
        assert_eq!(failure.status, Some(403));
        assert_eq!(failure.payload.unwrap()["detail"], "not allowed");
        assert!(h.executor.destinations().is_empty());

        // 不会自动重试
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.policy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transfer_failure_keeps_rejection_payload() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("fail.mp4"))
            .unwrap();

        let record = wait_for_status(&h.orchestrator, "v1", UploadStatus::TransferFailed).await;
        let failure = record.error.unwrap();
        assert_eq!(failure.status, Some(413));
        assert_eq!(failure.payload.unwrap()["file"][0], "too large");
        assert_eq!(record.progress, 40);

        // 重试 = 新的 add_upload
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("clip.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;
        assert_eq!(h.policy.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn progress_is_monotonic_despite_jitter() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("jitter.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SDKEvent::UploadProgress { progress: p, .. } = event {
                progress.push(p);
            }
        }
        assert_eq!(progress, vec![30, 60, 90, 100]);
        assert!(progress.iter().all(|p| *p <= 100));
    }

    #[tokio::test]
    async fn content_type_flag_follows_object_type() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::TimedTextTracks, "t1", file("subs.vtt"))
            .unwrap();
        wait_for_status(&h.orchestrator, "t1", UploadStatus::Succeeded).await;
        assert!(!h.executor.requests.lock()[0].include_content_type);
    }

    #[tokio::test]
    async fn reset_removes_record_and_stops_cycle() {
        let h = harness();
        let mut rx = h.orchestrator.subscribe();
        let generation = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("slow.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Transferring).await;

        assert!(h.orchestrator.reset_upload("v1"));
        assert!(h.orchestrator.get("v1").is_none());
        assert!(!h.orchestrator.reset_upload("v1"));
        assert!(!h.orchestrator.inner.apply_progress("v1", generation, 50));

        let mut saw_removed = false;
        while let Ok(event) = rx.try_recv() {
            if let SDKEvent::UploadRemoved { object_id, .. } = event {
                saw_removed = object_id == "v1";
            }
        }
        assert!(saw_removed);
    }

    #[tokio::test]
    async fn success_marks_cached_resource_processing() {
        let h = harness();
        h.store
            .replace("videos", json!({"id": "v1", "upload_state": "pending"}), UpdateSource::LiveSync)
            .unwrap();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("clip.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Succeeded).await;

        let cached = h.store.get(&ResourceKey::new("videos", "v1")).unwrap();
        assert_eq!(cached["upload_state"], PROCESSING_UPLOAD_STATE);
    }

    #[tokio::test]
    async fn add_upload_requires_running_orchestrator() {
        let h = harness();
        h.orchestrator.stop();
        let err = h
            .orchestrator
            .add_upload(ObjectType::Videos, "v1", file("clip.mp4"))
            .unwrap_err();
        assert!(matches!(err, MediaSyncError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn stop_drops_in_flight_records_but_keeps_finished_ones() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::Videos, "done", file("clip.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "done", UploadStatus::Succeeded).await;
        h.orchestrator
            .add_upload(ObjectType::Videos, "busy", file("slow.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "busy", UploadStatus::Transferring).await;

        h.orchestrator.stop();
        assert!(h.orchestrator.get("busy").is_none());
        assert_eq!(h.orchestrator.get("done").unwrap().status, UploadStatus::Succeeded);
    }

    #[tokio::test]
    async fn dropping_last_handle_aborts_in_flight_uploads() {
        let h = harness();
        h.orchestrator
            .add_upload(ObjectType::Videos, "v1", file("slow.mp4"))
            .unwrap();
        wait_for_status(&h.orchestrator, "v1", UploadStatus::Transferring).await;
        let weak = Arc::downgrade(&h.orchestrator.inner);

        // 还有其他句柄时上传继续
        let other = h.orchestrator.clone();
        drop(h.orchestrator);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(other.get("v1").unwrap().status, UploadStatus::Transferring);

        // 最后一个句柄释放后任务被中止，共享状态随之释放
        drop(other);
        tokio::time::timeout(Duration::from_secs(5), async {
            while weak.upgrade().is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upload task still holds the orchestrator");
    }
}

