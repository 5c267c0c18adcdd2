//! 统一 SDK 接口 - MediaSyncSDK 主入口
//!
//! 分层架构设计：
//! ```text
//! MediaSyncSDK (门面)
//!   ├── UploadOrchestrator (上传编排层)
//!   │     ├── PolicyClient (凭证签发)
//!   │     └── TransferExecutor (对象存储直传)
//!   ├── LiveSyncManager (实时同步层)
//!   │     ├── SocketConnector (WebSocket)
//!   │     └── ResourceFetcher (断线补偿读取)
//!   ├── ResourceStore (资源缓存)
//!   └── EventManager (事件系统层)
//! ```
//!
//! 设计原则：
//! - 异步优先：长耗时操作都在后台任务中完成，调用方不被阻塞
//! - 无全局单例：SDK 实例自行持有全部组件，`shutdown` 后可丢弃
//! - 事件驱动：状态变化统一经 `EventManager` 广播

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

use crate::error::{MediaSyncError, Result};
use crate::events::{EventManager, SDKEvent};
use crate::http_client::{build_reqwest_client, build_transfer_client, ApiHttpClient};
use crate::live_sync::backoff::ReconnectPolicy;
use crate::live_sync::connection::{LiveSyncConnection, LiveSyncContext};
use crate::live_sync::manager::LiveSyncManager;
use crate::live_sync::transport::{ResourceFetcher, SocketConnector, TungsteniteConnector};
use crate::object_type::ObjectType;
use crate::reporting::{ErrorReporter, ErrorSink, TracingErrorReporter};
use crate::session::SessionIdentity;
use crate::store::{MemoryResourceStore, ResourceStore};
use crate::upload::orchestrator::UploadOrchestrator;
use crate::upload::policy::PolicyClient;
use crate::upload::record::{UploadFile, UploadRecord};
use crate::upload::transfer::{HttpTransferExecutor, TransferExecutor, DEFAULT_CHUNK_SIZE};

/// HTTP 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒），仅作用于凭证申请与资源读取；对象存储直传不受限
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(30),
            request_timeout_secs: Some(300),
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// MediaSync SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSyncConfig {
    /// 后端 API 基础 URL，例如 https://lms.example.com/
    pub api_base_url: String,
    /// 宿主页面来源，决定 ws / wss
    pub page_origin: String,
    /// WebSocket 路径前缀
    pub websocket_path: String,
    /// 当前会话
    pub session: SessionIdentity,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 重连策略
    pub reconnect: ReconnectPolicy,
    /// 事件配置
    pub event_config: EventConfig,
    /// 上传分片大小（字节）
    pub upload_chunk_size: usize,
    /// 调试模式
    pub debug_mode: bool,
}

impl Default for MediaSyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8060/".to_string(),
            page_origin: "http://localhost:8060".to_string(),
            websocket_path: "/ws".to_string(),
            session: SessionIdentity::default(),
            http_client_config: HttpClientConfig::default(),
            reconnect: ReconnectPolicy::default(),
            event_config: EventConfig::default(),
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
            debug_mode: false,
        }
    }
}

impl MediaSyncConfig {
    pub fn builder() -> MediaSyncConfigBuilder {
        MediaSyncConfigBuilder::new()
    }

    /// 从 JSON 文档加载（缺省字段取默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MediaSyncError::Config(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.parsed_api_base_url()?;
        self.parsed_page_origin()?;

        if !self.websocket_path.starts_with('/') {
            return Err(MediaSyncError::Config(format!(
                "websocket_path 必须以 / 开头: {}",
                self.websocket_path
            )));
        }

        if self.event_config.buffer_size == 0 {
            return Err(MediaSyncError::Config("事件缓冲区大小不能为0".to_string()));
        }

        if self.upload_chunk_size == 0 {
            return Err(MediaSyncError::Config("上传分片大小不能为0".to_string()));
        }

        Ok(())
    }

    /// API 基础 URL（保证以 / 结尾，便于拼接相对路径）
    pub fn parsed_api_base_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| MediaSyncError::Config(format!("api_base_url 无效 ({}): {}", self.api_base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MediaSyncError::Config(format!(
                "api_base_url 必须是 http(s) 地址: {}",
                self.api_base_url
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn parsed_page_origin(&self) -> Result<Url> {
        let url = Url::parse(&self.page_origin)
            .map_err(|e| MediaSyncError::Config(format!("page_origin 无效 ({}): {}", self.page_origin, e)))?;
        if url.host_str().is_none() {
            return Err(MediaSyncError::Config(format!(
                "page_origin 缺少主机名: {}",
                self.page_origin
            )));
        }
        Ok(url)
    }
}

/// MediaSync SDK 配置构建器
pub struct MediaSyncConfigBuilder {
    config: MediaSyncConfig,
}

impl Default for MediaSyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MediaSyncConfig::default(),
        }
    }

    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    /// 设置页面来源（同时作为 WebSocket 的主机）
    pub fn page_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.config.page_origin = origin.into();
        self
    }

    pub fn websocket_path<S: Into<String>>(mut self, path: S) -> Self {
        self.config.websocket_path = path.into();
        self
    }

    pub fn session(mut self, session: SessionIdentity) -> Self {
        self.config.session = session;
        self
    }

    /// 设置 HTTP 客户端配置
    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    pub fn upload_chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.upload_chunk_size = chunk_size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> MediaSyncConfig {
        self.config
    }
}

/// 可替换的外部组件（测试或嵌入宿主时注入）
#[derive(Clone)]
pub struct SdkComponents {
    pub policy_client: Arc<dyn PolicyClient>,
    pub executor: Arc<dyn TransferExecutor>,
    pub connector: Arc<dyn SocketConnector>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub store: Arc<dyn ResourceStore>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl SdkComponents {
    /// 按配置创建生产组件：reqwest + tokio-tungstenite + 内存缓存
    pub fn from_config(config: &MediaSyncConfig) -> Result<Self> {
        let http = build_reqwest_client(&config.http_client_config)?;
        let api = Arc::new(ApiHttpClient::new(
            http,
            config.parsed_api_base_url()?,
            config.session.clone(),
        ));
        Ok(Self {
            policy_client: api.clone(),
            executor: Arc::new(
                HttpTransferExecutor::new(build_transfer_client(&config.http_client_config)?)
                    .with_chunk_size(config.upload_chunk_size),
            ),
            connector: Arc::new(TungsteniteConnector),
            fetcher: api,
            store: Arc::new(MemoryResourceStore::default()),
            reporter: Arc::new(TracingErrorReporter),
        })
    }
}

/// 统一 SDK 主接口
pub struct MediaSyncSDK {
    /// SDK 配置
    config: MediaSyncConfig,

    /// 事件管理器
    event_manager: Arc<EventManager>,

    /// 资源缓存
    store: Arc<dyn ResourceStore>,

    /// 上传编排器
    uploads: UploadOrchestrator,

    /// 实时同步管理器
    live_sync: LiveSyncManager,

    /// 是否已初始化
    initialized: AtomicBool,

    /// 是否正在关闭
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for MediaSyncSDK {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSyncSDK")
            .field("api_base_url", &self.config.api_base_url)
            .field("uploads", &self.uploads)
            .field("live_sync", &self.live_sync)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl MediaSyncSDK {
    /// 使用生产组件初始化 SDK
    pub async fn initialize(config: MediaSyncConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let components = SdkComponents::from_config(&config)?;
        Self::initialize_with_components(config, components).await
    }

    /// 使用注入的组件初始化 SDK
    ///
    /// 分层初始化顺序：
    /// 1. 事件层 → 2. 上传编排 → 3. 实时同步
    pub async fn initialize_with_components(config: MediaSyncConfig, components: SdkComponents) -> Result<Arc<Self>> {
        info!("正在初始化 MediaSyncSDK {}...", crate::version::SDK_VERSION);
        config.validate()?;

        // === 第1层：事件管理器 ===
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size));
        let errors = ErrorSink::new(components.reporter.clone(), event_manager.clone());

        // === 第2层：上传编排器 ===
        let uploads = UploadOrchestrator::new(
            components.policy_client.clone(),
            components.executor.clone(),
            event_manager.clone(),
            errors.clone(),
        )
        .with_store(components.store.clone());
        uploads.start();

        // === 第3层：实时同步 ===
        let ctx = LiveSyncContext {
            connector: components.connector.clone(),
            fetcher: components.fetcher.clone(),
            store: components.store.clone(),
            events: event_manager.clone(),
            errors,
            policy: config.reconnect.clone(),
        };
        let live_sync = LiveSyncManager::new(
            ctx,
            config.parsed_page_origin()?,
            config.websocket_path.clone(),
            config.session.clone(),
        );
        info!("实时同步管理器初始化完成");

        let sdk = Arc::new(Self {
            config,
            event_manager,
            store: components.store,
            uploads,
            live_sync,
            initialized: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
        });
        info!("✅ MediaSyncSDK 初始化完成");
        Ok(sdk)
    }

    /// 异步关闭 SDK：停止所有上传与实时同步连接
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 MediaSyncSDK...");

        self.uploads.stop();
        self.live_sync.stop_all().await;

        self.initialized.store(false, Ordering::SeqCst);
        info!("MediaSyncSDK 关闭完成");
        Ok(())
    }

    /// 检查 SDK 是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// 检查 SDK 是否正在关闭
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(MediaSyncError::ShuttingDown("SDK 正在关闭".to_string()));
        }
        if !self.is_initialized() {
            return Err(MediaSyncError::NotInitialized("SDK 未初始化".to_string()));
        }
        Ok(())
    }

    // ========== 上传 ==========

    /// 上传文件到对象 `object_id`；同一对象的进行中上传会被取代。返回代次。
    pub fn add_upload<S: Into<String>>(&self, object_type: ObjectType, object_id: S, file: UploadFile) -> Result<u64> {
        self.ensure_ready()?;
        self.uploads.add_upload(object_type, object_id, file)
    }

    pub fn reset_upload(&self, object_id: &str) -> bool {
        self.uploads.reset_upload(object_id)
    }

    pub fn upload(&self, object_id: &str) -> Option<UploadRecord> {
        self.uploads.get(object_id)
    }

    pub fn uploads_snapshot(&self) -> Vec<UploadRecord> {
        self.uploads.snapshot()
    }

    pub fn uploads(&self) -> &UploadOrchestrator {
        &self.uploads
    }

    // ========== 实时同步 ==========

    /// 开始跟踪资源的实时变化
    pub fn watch_resource(&self, resource_type: &str, resource_id: &str) -> Result<Arc<LiveSyncConnection>> {
        self.ensure_ready()?;
        self.live_sync.watch(resource_type, resource_id)
    }

    pub async fn unwatch_resource(&self, resource_type: &str, resource_id: &str) -> bool {
        self.live_sync.unwatch(resource_type, resource_id).await
    }

    pub fn live_sync(&self) -> &LiveSyncManager {
        &self.live_sync
    }

    // ========== 其它 ==========

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.event_manager
    }

    /// 订阅全部 SDK 事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.event_manager.subscribe()
    }

    pub fn config(&self) -> &MediaSyncConfig {
        &self.config
    }
}
