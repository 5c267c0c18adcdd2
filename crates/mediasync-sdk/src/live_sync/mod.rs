//! 实时同步模块
//!
//! - `endpoint`: 连接地址构建
//! - `backoff`: 重连策略
//! - `state`: 连接状态
//! - `transport`: 套接字与资源点读接口
//! - `connection`: 单资源连接循环
//! - `manager`: 多资源连接管理

pub mod backoff;
pub mod connection;
pub mod endpoint;
pub mod manager;
pub mod state;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ChangeMessage, LiveSyncConnection, LiveSyncContext};
pub use endpoint::build_socket_url;
pub use manager::LiveSyncManager;
pub use state::{ConnectionPhase, ConnectionState};
pub use transport::{
    ResourceFetcher, SocketConnection, SocketConnector, SocketEvent, TungsteniteConnector,
    PERMANENT_CLOSE_CODE,
};
