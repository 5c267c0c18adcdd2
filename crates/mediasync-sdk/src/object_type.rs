//! 可上传对象类型 - 受控枚举
//!
//! 每种类型对应一个后端 API 路径段，并决定上传表单中是否携带 Content-Type 字段。
//! 新增类型需与后端同步升级。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 对象类型（与后端 API 路径段一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    #[serde(rename = "videos")]
    Videos,
    #[serde(rename = "documents")]
    Documents,
    #[serde(rename = "thumbnails")]
    Thumbnails,
    #[serde(rename = "timedtexttracks")]
    TimedTextTracks,
    #[serde(rename = "sharedlivemedias")]
    SharedLiveMedias,
    #[serde(rename = "classroomdocuments")]
    ClassroomDocuments,
    #[serde(rename = "depositedfiles")]
    DepositedFiles,
    #[serde(rename = "markdown-images")]
    MarkdownImages,
}

impl ObjectType {
    pub const ALL: [ObjectType; 8] = [
        Self::Videos,
        Self::Documents,
        Self::Thumbnails,
        Self::TimedTextTracks,
        Self::SharedLiveMedias,
        Self::ClassroomDocuments,
        Self::DepositedFiles,
        Self::MarkdownImages,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Videos => "videos",
            Self::Documents => "documents",
            Self::Thumbnails => "thumbnails",
            Self::TimedTextTracks => "timedtexttracks",
            Self::SharedLiveMedias => "sharedlivemedias",
            Self::ClassroomDocuments => "classroomdocuments",
            Self::DepositedFiles => "depositedfiles",
            Self::MarkdownImages => "markdown-images",
        }
    }

    /// 上传表单是否需要显式的 Content-Type 字段
    ///
    /// 对象存储按该字段设置对象的 content type；文档类与字幕类由后端处理流程自行识别，不携带。
    pub fn requires_content_type(self) -> bool {
        matches!(
            self,
            Self::Videos
                | Self::Thumbnails
                | Self::SharedLiveMedias
                | Self::DepositedFiles
                | Self::MarkdownImages
        )
    }

    /// 申请上传凭证的 API 路径（相对 api_base_url）
    pub fn initiate_upload_path(self, object_id: &str) -> String {
        format!("/api/{}/{}/initiate-upload/", self.as_str(), object_id)
    }
}

impl FromStr for ObjectType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
