//! 消息本地模型定义

use crate::sync::now_millis;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// 消息角色
///
/// 服务端按自由文本存储角色，未知的值保存在 `Other` 中原样往返。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Other(role) => role,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            "tool" => Self::Tool,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match Role::from(s.as_str()) {
            Self::Other(_) => Self::Other(s),
            known => known,
        }
    }
}

impl FromStr for Role {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Role::from)
    }
}

/// 消息记录
///
/// 消息创建后不可变，因此只有 `created_at`。`is_synced` 是本地标记，不参与序列化上传。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub chat_id: String,
    pub content: String,
    pub role: Role,
    #[serde(default = "now_millis")]
    pub created_at: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing)]
    pub is_synced: bool,
}

impl Message {
    /// 新建一条未同步的消息
    pub fn new(
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            role,
            created_at: now_millis(),
            image_url: None,
            prompt: None,
            is_synced: false,
        }
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_synced(mut self, is_synced: bool) -> Self {
        self.is_synced = is_synced;
        self
    }
}
