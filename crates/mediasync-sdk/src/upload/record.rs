//! 上传记录与文件句柄

use bytes::Bytes;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio_util::io::ReaderStream;

use crate::error::{MediaSyncError, Result};
use crate::object_type::ObjectType;
use crate::utils::now_millis;

/// 文件字节流（分片）
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// 文件字节来源
#[derive(Debug, Clone)]
pub enum FileSource {
    /// 内存中的字节
    Bytes(Bytes),
    /// 本地文件，传输时再读取
    Path(PathBuf),
}

/// 待上传文件（不透明句柄：文件名、大小、MIME、字节来源）
#[derive(Debug, Clone, Serialize)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip)]
    source: Option<FileSource>,
}

impl UploadFile {
    /// 从内存创建
    pub fn from_bytes<N: Into<String>, M: Into<String>>(name: N, mime_type: M, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            source: Some(FileSource::Bytes(data)),
        }
    }

    /// 从本地路径创建（读取元数据，MIME 按扩展名推断）
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(MediaSyncError::InvalidArgument(format!(
                "不是普通文件: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(Self {
            name,
            size: metadata.len(),
            mime_type: detect_mime_type(path),
            source: Some(FileSource::Path(path.to_path_buf())),
        })
    }

    pub fn source(&self) -> Option<&FileSource> {
        self.source.as_ref()
    }

    /// 打开分片字节流
    pub async fn open_stream(&self, chunk_size: usize) -> Result<ByteStream> {
        let chunk_size = chunk_size.max(1);
        match &self.source {
            Some(FileSource::Bytes(data)) => {
                let data = data.clone();
                let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
                    .step_by(chunk_size)
                    .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                    .collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
            Some(FileSource::Path(path)) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::pin(ReaderStream::with_capacity(file, chunk_size)))
            }
            None => Err(MediaSyncError::InvalidArgument(format!(
                "文件 {} 没有可读取的字节来源",
                self.name
            ))),
        }
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Initializing,
    Transferring,
    Succeeded,
    PolicyFailed,
    TransferFailed,
}

impl UploadStatus {
    /// 终态：只能通过新的 add_upload 重新开始
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::PolicyFailed | Self::TransferFailed)
    }

    /// 允许的状态迁移
    ///
    /// Initializing → Transferring | PolicyFailed
    /// Transferring → Succeeded | TransferFailed
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Transferring)
                | (Self::Initializing, Self::PolicyFailed)
                | (Self::Transferring, Self::Succeeded)
                | (Self::Transferring, Self::TransferFailed)
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Initializing => write!(f, "初始化"),
            UploadStatus::Transferring => write!(f, "上传中"),
            UploadStatus::Succeeded => write!(f, "上传成功"),
            UploadStatus::PolicyFailed => write!(f, "获取上传凭证失败"),
            UploadStatus::TransferFailed => write!(f, "上传失败"),
        }
    }
}

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Policy,
    Transfer,
}

/// 失败详情，供 UI 按字段展示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub kind: FailureKind,
    /// HTTP 状态码（网络层失败时为 None）
    pub status: Option<u16>,
    pub message: String,
    /// 对象存储 / 后端返回的结构化拒绝内容（JSON 时原样保留）
    pub payload: Option<serde_json::Value>,
}

impl UploadFailure {
    pub fn policy(error: &MediaSyncError) -> Self {
        let (status, payload) = match error {
            MediaSyncError::Http { status, body } => (Some(*status), serde_json::from_str(body).ok()),
            _ => (None, None),
        };
        Self {
            kind: FailureKind::Policy,
            status,
            message: error.to_string(),
            payload,
        }
    }

    /// 对象存储拒绝（非 2xx）
    pub fn rejected(status: u16, body: String) -> Self {
        let payload = serde_json::from_str(&body).ok();
        Self {
            kind: FailureKind::Transfer,
            status: Some(status),
            message: body,
            payload,
        }
    }

    /// 网络层失败
    pub fn network(error: &MediaSyncError) -> Self {
        Self {
            kind: FailureKind::Transfer,
            status: error.http_status(),
            message: error.to_string(),
            payload: None,
        }
    }
}

/// 上传记录（每个 object_id 至多一条）
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub object_id: String,
    pub object_type: ObjectType,
    pub file: UploadFile,
    /// 0-100
    pub progress: u8,
    pub status: UploadStatus,
    pub error: Option<UploadFailure>,
    /// 代次：新的 add_upload 会生成更大的代次，旧代次的回调一律丢弃
    pub generation: u64,
    pub updated_at: u64,
}

impl UploadRecord {
    pub fn new(object_id: String, object_type: ObjectType, file: UploadFile, generation: u64) -> Self {
        Self {
            object_id,
            object_type,
            file,
            progress: 0,
            status: UploadStatus::Initializing,
            error: None,
            generation,
            updated_at: now_millis(),
        }
    }
}

/// 按扩展名推断 MIME 类型
pub fn detect_mime_type(path: &Path) -> String {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "mp4" => "video/mp4",
            "mov" => "video/quicktime",
            "webm" => "video/webm",
            "mkv" => "video/x-matroska",
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "vtt" => "text/vtt",
            "srt" => "application/x-subrip",
            "pdf" => "application/pdf",
            "ppt" => "application/vnd.ms-powerpoint",
            "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            "odp" => "application/vnd.oasis.opendocument.presentation",
            "zip" => "application/zip",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    } else {
        "application/octet-stream"
    }
    .to_string()
}
