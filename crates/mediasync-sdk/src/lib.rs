//! MediaSync SDK - 上传编排与实时资源同步
//!
//! 本 SDK 为学习工具前端提供两类能力：
//! - 📤 预签名直传：申请上传凭证，按对象存储要求的字段顺序以 multipart 直传，单调进度
//! - 🔁 单对象单上传：同一对象再次上传会取代进行中的上传，旧回调一律丢弃
//! - 📡 实时同步：每个资源一条 WebSocket，断线按策略重连，重连后补读一次资源
//! - 🗂️ 资源缓存：推送快照整体替换缓存条目，上传成功后乐观标记为 processing
//! - ⚙️ 事件系统：上传、连接、缓存、异常的统一广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use mediasync_sdk::{MediaSyncConfig, MediaSyncSDK, ObjectType, SessionIdentity, UploadFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 配置 SDK
//!     let config = MediaSyncConfig::builder()
//!         .api_base_url("https://lms.example.com/")
//!         .page_origin("https://lms.example.com")
//!         .session(SessionIdentity::authenticated("jwt-token"))
//!         .build();
//!
//!     // 初始化 SDK
//!     let sdk = MediaSyncSDK::initialize(config).await?;
//!
//!     // 监听事件
//!     let mut events = sdk.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("事件: {}", event.event_type());
//!         }
//!     });
//!
//!     // 跟踪视频的实时状态，并上传源文件
//!     sdk.watch_resource("videos", "v1")?;
//!     let file = UploadFile::from_path(std::path::Path::new("lecture.mp4")).await?;
//!     sdk.add_upload(ObjectType::Videos, "v1", file)?;
//!
//!     // 关闭 SDK
//!     sdk.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod error;
pub mod events;
pub mod http_client;
pub mod live_sync;
pub mod object_type;
pub mod reporting;
pub mod sdk;
pub mod session;
pub mod store;
pub mod upload;
pub mod utils;
pub mod version;

// 重新导出核心类型，方便使用
pub use error::{MediaSyncError, Result};
pub use events::{EventManager, SDKEvent};
pub use http_client::{build_reqwest_client, build_transfer_client, ApiHttpClient};
pub use live_sync::{
    ConnectionPhase, ConnectionState, LiveSyncConnection, LiveSyncManager, ReconnectPolicy,
};
pub use object_type::ObjectType;
pub use reporting::{ErrorReporter, TracingErrorReporter};
pub use sdk::{EventConfig, HttpClientConfig, MediaSyncConfig, MediaSyncSDK, SdkComponents};
pub use session::SessionIdentity;
pub use store::{MemoryResourceStore, ResourceKey, ResourceStore, UpdateSource};
pub use upload::{
    FailureKind, PolicyClient, TransferExecutor, UploadFailure, UploadFile, UploadOrchestrator,
    UploadPolicy, UploadRecord, UploadStatus,
};
pub use utils::init_tracing;
pub use version::{BUILD_TIME, SDK_VERSION};
