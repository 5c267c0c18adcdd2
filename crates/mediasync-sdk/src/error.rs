use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaSyncError {
    #[error("Transport error: {0}")]
    Transport(String),
    /// 后端或对象存储返回非 2xx，body 原样保留
    #[error("HTTP error [{status}]: {body}")]
    Http { status: u16, body: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Shutting down: {0}")]
    ShuttingDown(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for MediaSyncError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => MediaSyncError::Http {
                status: status.as_u16(),
                body: error.to_string(),
            },
            None => MediaSyncError::Transport(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for MediaSyncError {
    fn from(error: serde_json::Error) -> Self {
        MediaSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for MediaSyncError {
    fn from(error: std::io::Error) -> Self {
        MediaSyncError::IO(error.to_string())
    }
}

impl From<url::ParseError> for MediaSyncError {
    fn from(error: url::ParseError) -> Self {
        MediaSyncError::InvalidArgument(format!("invalid url: {}", error))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MediaSyncError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        MediaSyncError::Transport(error.to_string())
    }
}

impl MediaSyncError {
    /// 获取 HTTP 状态码（如果这是一个 HTTP 错误）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            MediaSyncError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 判断是否是网络层错误（未拿到任何 HTTP 响应）
    pub fn is_transport(&self) -> bool {
        matches!(self, MediaSyncError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaSyncError>;
