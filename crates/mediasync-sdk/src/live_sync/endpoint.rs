//! 实时同步连接地址
//!
//! `{ws|wss}://{host}{path}/{resource_type}/{resource_id}/?jwt={token}`，
//! 未认证会话额外追加 `&anonymous_id={id}`。协议跟随页面来源：https 页面用 wss。

use url::Url;

use crate::error::{MediaSyncError, Result};
use crate::session::SessionIdentity;

/// 构建资源的 WebSocket 地址
pub fn build_socket_url(
    page_origin: &Url,
    websocket_path: &str,
    resource_type: &str,
    resource_id: &str,
    session: &SessionIdentity,
) -> Result<Url> {
    if resource_type.is_empty() || resource_id.is_empty() {
        return Err(MediaSyncError::InvalidArgument(
            "resource_type 与 resource_id 不能为空".to_string(),
        ));
    }
    let scheme = match page_origin.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = page_origin
        .host_str()
        .ok_or_else(|| MediaSyncError::InvalidArgument(format!("页面来源缺少主机名: {}", page_origin)))?;
    let authority = match page_origin.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = websocket_path.trim_end_matches('/');
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let mut url = Url::parse(&format!(
        "{}://{}{}/{}/{}/",
        scheme, authority, path, resource_type, resource_id
    ))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("jwt", session.token());
        if let Some(anonymous_id) = session.anonymous_id() {
            query.append_pair("anonymous_id", anonymous_id);
        }
    }
    Ok(url)
}

/// 去掉 jwt 的地址，用于日志与状态展示
pub fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "jwt" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
