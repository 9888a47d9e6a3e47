//! 会话本地模型定义

use crate::sync::now_millis;
use serde::{Deserialize, Serialize};

/// 会话记录（本地缓存与远端共用同一结构）
///
/// `created_at` / `updated_at` 在 JSON 中缺失时取当前时间；`deleted_at` 非空即为软删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub chat_id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default = "now_millis")]
    pub created_at: i64,
    #[serde(default = "now_millis")]
    pub updated_at: i64,
    #[serde(default)]
    pub deleted_at: Option<i64>,
}

impl Chat {
    /// 新建会话，创建与更新时间取当前时间
    pub fn new(
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn with_deleted_at(mut self, deleted_at: Option<i64>) -> Self {
        self.deleted_at = deleted_at;
        self
    }

    /// 是否已软删除（墓碑）
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// 会话列表项：附带消息数与最近活跃时间
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub message_count: i64,
    pub last_activity: Option<i64>,
}

/// 带 `updated_at` 列、可以刷新时间戳的表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampedTable {
    Chats,
}

impl TimestampedTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Chats => "chats",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamps_default_to_now() {
        let before = now_millis();
        let chat: Chat = serde_json::from_value(serde_json::json!({
            "chatId": "c1",
            "userId": "u1",
            "title": "hello"
        }))
        .unwrap();
        assert!(chat.created_at >= before);
        assert!(chat.updated_at >= before);
        assert!(!chat.is_deleted());
    }

    #[test]
    fn wire_format_is_camel_case() {
        let chat = Chat::new("c1", "u1", "t")
            .with_updated_at(5)
            .with_deleted_at(Some(6));
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["updatedAt"], 5);
        assert_eq!(json["deletedAt"], 6);
    }
}
