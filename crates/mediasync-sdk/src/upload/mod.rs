//! 上传模块
//!
//! - `policy`: 上传凭证与签发方接口
//! - `transfer`: 向对象存储的 multipart 直传
//! - `orchestrator`: 每个对象一条记录的上传编排

pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod record;
pub mod transfer;

pub use orchestrator::{UploadOrchestrator, PROCESSING_UPLOAD_STATE};
pub use policy::{PolicyClient, UploadPolicy};
pub use progress::{ProgressCallback, ProgressTracker};
pub use record::{FailureKind, UploadFailure, UploadFile, UploadRecord, UploadStatus};
pub use transfer::{HttpTransferExecutor, TransferExecutor, TransferOutcome, TransferRequest};
