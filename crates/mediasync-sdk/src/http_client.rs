//! HTTP 客户端模块 - 后端 API 访问
//!
//! 两类请求：
//! - `POST /api/{object_type}/{id}/initiate-upload/` 申请上传凭证
//! - `GET /api/{resource_type}/{id}/` 断线补偿时点读资源
//!
//! 均携带 `Authorization: Bearer {jwt}`。

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{MediaSyncError, Result};
use crate::live_sync::transport::ResourceFetcher;
use crate::object_type::ObjectType;
use crate::sdk::HttpClientConfig;
use crate::session::SessionIdentity;
use crate::upload::policy::{PolicyClient, UploadPolicy};
use crate::upload::record::UploadFile;

/// 按配置创建 reqwest 客户端（API 与对象存储上传共用）
pub fn build_reqwest_client(config: &HttpClientConfig) -> Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(timeout));
    }

    if let Some(timeout) = config.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(timeout));
    }

    builder
        .build()
        .map_err(|e| MediaSyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))
}

/// 对象存储直传专用客户端：只限制建连时间，不设整体请求超时
pub fn build_transfer_client(config: &HttpClientConfig) -> Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(timeout));
    }

    builder
        .build()
        .map_err(|e| MediaSyncError::Config(format!("创建上传客户端失败: {}", e)))
}

/// 申请上传凭证的请求体
#[derive(Debug, Serialize)]
struct InitiateUploadRequest<'a> {
    filename: &'a str,
    mimetype: &'a str,
    size: u64,
}

/// 后端 API 客户端
#[derive(Debug)]
pub struct ApiHttpClient {
    client: Client,
    base_url: Url,
    session: RwLock<SessionIdentity>,
}

impl ApiHttpClient {
    pub fn new(client: Client, base_url: Url, session: SessionIdentity) -> Self {
        info!("✅ API 客户端已创建 (base_url: {})", base_url);
        Self {
            client,
            base_url,
            session: RwLock::new(session),
        }
    }

    /// 替换会话（例如 jwt 刷新后）
    pub fn update_session(&self, session: SessionIdentity) {
        *self.session.write() = session;
    }

    pub fn session(&self) -> SessionIdentity {
        self.session.read().clone()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.session.read().token())
    }

    /// 非 2xx 转为 `MediaSyncError::Http`，响应体原样保留
    async fn check(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "无法读取错误信息".to_string());
        error!("❌ {}失败，HTTP 状态码: {}, 错误: {}", action, status, body);
        Err(MediaSyncError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PolicyClient for ApiHttpClient {
    async fn initiate_upload(
        &self,
        object_type: ObjectType,
        object_id: &str,
        file: &UploadFile,
    ) -> Result<UploadPolicy> {
        let url = self.endpoint(&object_type.initiate_upload_path(object_id))?;
        debug!("🔑 申请上传凭证: {}", url);

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(&InitiateUploadRequest {
                filename: &file.name,
                mimetype: &file.mime_type,
                size: file.size,
            })
            .send()
            .await?;
        let response = Self::check(response, "申请上传凭证").await?;

        let policy: UploadPolicy = response
            .json()
            .await
            .map_err(|e| MediaSyncError::Serialization(format!("解析上传凭证失败: {}", e)))?;
        info!(
            "✅ 已获取上传凭证: {} {} ({} 个字段)",
            object_type,
            object_id,
            policy.fields.len()
        );
        Ok(policy)
    }
}

#[async_trait]
impl ResourceFetcher for ApiHttpClient {
    async fn fetch_resource(&self, resource_type: &str, resource_id: &str) -> Result<Value> {
        let url = self.endpoint(&format!("/api/{}/{}/", resource_type, resource_id))?;
        debug!("🔗 读取资源: {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let response = Self::check(response, "读取资源").await?;

        response
            .json()
            .await
            .map_err(|e| MediaSyncError::Serialization(format!("解析资源失败: {}", e)))
    }
}
