//! 上传执行器 - 向对象存储发起 multipart 直传
//!
//! 表单字段顺序是下游签名校验的硬性要求：
//! 1. 凭证字段，按签发顺序
//! 2. `Content-Type`（仅对需要显式内容类型的对象类型）
//! 3. `file`，必须是最后一个字段
//!
//! 执行器内部不重试，重试由编排器的调用方决定。

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{multipart, Body, Client};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{MediaSyncError, Result};
use crate::upload::progress::{ProgressCallback, ProgressTracker};
use crate::upload::record::{UploadFailure, UploadFile};

/// 默认分片大小（影响进度回报粒度）
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// 一次上传请求
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination: String,
    pub fields: Vec<(String, String)>,
    pub include_content_type: bool,
    pub file: UploadFile,
}

/// 表单字段（按发送顺序）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Credential { name: String, value: String },
    ContentType(String),
    File { file_name: String, mime_type: String, size: u64 },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            FormField::Credential { name, .. } => name,
            FormField::ContentType(_) => "Content-Type",
            FormField::File { .. } => "file",
        }
    }
}

impl TransferRequest {
    pub fn new<S: Into<String>>(
        destination: S,
        fields: Vec<(String, String)>,
        include_content_type: bool,
        file: UploadFile,
    ) -> Self {
        Self {
            destination: destination.into(),
            fields,
            include_content_type,
            file,
        }
    }

    /// 表单字段规划
    pub fn form_plan(&self) -> Vec<FormField> {
        let mut plan: Vec<FormField> = self
            .fields
            .iter()
            .map(|(name, value)| FormField::Credential {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        if self.include_content_type {
            plan.push(FormField::ContentType(self.file.mime_type.clone()));
        }
        plan.push(FormField::File {
            file_name: self.file.name.clone(),
            mime_type: self.file.mime_type.clone(),
            size: self.file.size,
        });
        plan
    }
}

/// 上传结果
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Succeeded,
    Failed(UploadFailure),
}

/// 上传执行器
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn transfer(&self, request: TransferRequest, on_progress: ProgressCallback) -> TransferOutcome;
}

/// 基于 reqwest 的执行器
#[derive(Debug, Clone)]
pub struct HttpTransferExecutor {
    client: Client,
    chunk_size: usize,
}

impl HttpTransferExecutor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 按规划构建 multipart 表单；文件体以流的形式读取，每读出一个分片推进一次进度
    async fn build_form(
        &self,
        request: &TransferRequest,
        tracker: Arc<Mutex<ProgressTracker>>,
    ) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for field in request.form_plan() {
            form = match field {
                FormField::Credential { name, value } => form.text(name, value),
                FormField::ContentType(mime) => form.text("Content-Type", mime),
                FormField::File { file_name, mime_type, size } => {
                    let tracker = tracker.clone();
                    let stream = request
                        .file
                        .open_stream(self.chunk_size)
                        .await?
                        .map(move |chunk| {
                            if let Ok(bytes) = &chunk {
                                tracker.lock().advance(bytes.len() as u64);
                            }
                            chunk
                        });
                    let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), size)
                        .file_name(file_name)
                        .mime_str(&mime_type)
                        .map_err(|e| MediaSyncError::InvalidArgument(format!("无效的 MIME 类型 {}: {}", mime_type, e)))?;
                    form.part("file", part)
                }
            };
        }
        Ok(form)
    }

    async fn send(&self, request: &TransferRequest, tracker: Arc<Mutex<ProgressTracker>>) -> TransferOutcome {
        let form = match self.build_form(request, tracker.clone()).await {
            Ok(form) => form,
            Err(e) => {
                error!("❌ 构建上传表单失败: {}", e);
                return TransferOutcome::Failed(UploadFailure::network(&e));
            }
        };

        tracker.lock().start();

        let response = match self.client.post(&request.destination).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                let e = MediaSyncError::from(e);
                error!("❌ 上传请求失败: {}", e);
                return TransferOutcome::Failed(UploadFailure::network(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误信息".to_string());
            error!("❌ 对象存储拒绝上传，HTTP 状态码: {}, 错误: {}", status, body);
            return TransferOutcome::Failed(UploadFailure::rejected(status.as_u16(), body));
        }

        tracker.lock().finish();
        TransferOutcome::Succeeded
    }
}

#[async_trait]
impl TransferExecutor for HttpTransferExecutor {
    async fn transfer(&self, request: TransferRequest, on_progress: ProgressCallback) -> TransferOutcome {
        info!(
            "📤 开始上传文件: {} ({} bytes) -> {}",
            request.file.name, request.file.size, request.destination
        );
        debug!(
            "表单字段顺序: {:?}",
            request.form_plan().iter().map(|f| f.name().to_string()).collect::<Vec<_>>()
        );

        let tracker = Arc::new(Mutex::new(ProgressTracker::new(request.file.size, on_progress)));
        let outcome = self.send(&request, tracker).await;

        if outcome == TransferOutcome::Succeeded {
            info!("✅ 文件上传成功: {}", request.file.name);
        }
        outcome
    }
}
