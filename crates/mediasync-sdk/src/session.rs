//! 会话身份 - 上传凭证请求与实时同步连接共用
//!
//! 会话本身由外部签发（LTI 启动流程），SDK 只负责携带。
//! 未认证（公开访问）的会话额外带一个本地生成的匿名 ID，整个会话生命周期内不变。

use serde::{Deserialize, Serialize};

/// 会话身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// 访问令牌（JWT）
    jwt: String,
    /// 是否为已认证会话
    authenticated: bool,
    /// 匿名 ID（仅未认证会话）
    anonymous_id: Option<String>,
}

impl SessionIdentity {
    /// 已认证会话
    pub fn authenticated<S: Into<String>>(jwt: S) -> Self {
        Self {
            jwt: jwt.into(),
            authenticated: true,
            anonymous_id: None,
        }
    }

    /// 未认证会话，生成新的匿名 ID
    pub fn anonymous<S: Into<String>>(jwt: S) -> Self {
        Self::anonymous_with_id(jwt, uuid::Uuid::new_v4().to_string())
    }

    /// 未认证会话，沿用已持久化的匿名 ID
    pub fn anonymous_with_id<S: Into<String>, I: Into<String>>(jwt: S, anonymous_id: I) -> Self {
        Self {
            jwt: jwt.into(),
            authenticated: false,
            anonymous_id: Some(anonymous_id.into()),
        }
    }

    pub fn token(&self) -> &str {
        &self.jwt
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// 匿名 ID；已认证会话返回 None
    pub fn anonymous_id(&self) -> Option<&str> {
        if self.authenticated {
            None
        } else {
            self.anonymous_id.as_deref()
        }
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::anonymous(String::new())
    }
}
