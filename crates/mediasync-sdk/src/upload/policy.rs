//! 上传凭证（预签名表单）
//!
//! 后端返回 `{ "url": ..., "fields": { ... } }`。部分对象存储的签名校验对字段顺序敏感，
//! 因此 fields 反序列化为保持原始顺序的列表，而不是 HashMap。

use async_trait::async_trait;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::Result;
use crate::object_type::ObjectType;
use crate::upload::record::UploadFile;

/// 预签名上传凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// 上传目标地址
    pub url: String,
    /// 凭证字段（服务端给出的顺序）
    #[serde(
        serialize_with = "serialize_fields",
        deserialize_with = "ordered_fields",
        default
    )]
    pub fields: Vec<(String, String)>,
}

impl UploadPolicy {
    pub fn new<S: Into<String>>(url: S, fields: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            fields,
        }
    }
}

/// 凭证签发方（后端 API）
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// 为 (对象类型, 对象 ID, 文件名, MIME) 申请短期上传凭证
    async fn initiate_upload(
        &self,
        object_type: ObjectType,
        object_id: &str,
        file: &UploadFile,
    ) -> Result<UploadPolicy>;
}

fn serialize_fields<S>(fields: &[(String, String)], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(fields.iter().map(|(k, v)| (k, v)))
}

/// 按文档顺序读取 JSON 对象；非字符串的值转为其 JSON 文本
fn ordered_fields<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedFields;

    impl<'de> Visitor<'de> for OrderedFields {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of credential fields")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => {
                        return Err(de::Error::custom(format!("field {} is null", name)))
                    }
                    other => other.to_string(),
                };
                fields.push((name, value));
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(OrderedFields)
}
