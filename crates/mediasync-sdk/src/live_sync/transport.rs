//! 实时同步传输层
//!
//! 连接循环只依赖这里的两个接口：`SocketConnector` 建立连接，
//! `ResourceFetcher` 在重连后补读资源。生产实现分别是 tokio-tungstenite 与 HTTP 客户端。

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::Result;

/// 服务端用于“凭证对该资源无效，不要再重连”的关闭码
pub const PERMANENT_CLOSE_CODE: u16 = 4003;

/// 套接字上的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// 文本帧
    Text(String),
    /// 连接已关闭（异常断开时 code 为 None）
    Closed { code: Option<u16>, reason: String },
}

impl SocketEvent {
    pub fn is_permanent_close(&self) -> bool {
        matches!(self, SocketEvent::Closed { code: Some(PERMANENT_CLOSE_CODE), .. })
    }
}

/// 一条已建立的连接
#[async_trait]
pub trait SocketConnection: Send {
    /// 下一个事件；返回 `Closed` 之后不应再调用
    async fn next_event(&mut self) -> SocketEvent;

    /// 主动关闭
    async fn close(&mut self);
}

/// 连接工厂
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn SocketConnection>>;
}

/// 资源点读（用于断线补偿）
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch_resource(&self, resource_type: &str, resource_id: &str) -> Result<Value>;
}

/// 基于 tokio-tungstenite 的连接工厂
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn SocketConnection>> {
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!("WebSocket 握手完成: HTTP {}", response.status());
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketConnection for TungsteniteConnection {
    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => SocketEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.into_owned(),
                        },
                        None => SocketEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                }
                // ping/pong 由 tungstenite 自动应答，二进制帧不属于协议
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("⚠️ WebSocket 读取失败: {}", e);
                    return SocketEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return SocketEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("关闭 WebSocket 时出错: {}", e);
        }
    }
}
