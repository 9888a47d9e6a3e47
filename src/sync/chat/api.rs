//! 会话 HTTP API 客户端
//!
//! 负责所有会话相关的远端请求

use crate::sync::chat::models::Chat;
use crate::sync::error::{Result, SyncError};
use crate::sync::pagination::Paginated;
use crate::sync::remote::{endpoint, RemoteQuery};
use crate::sync::types::{ensure_success, handle_http_response};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatListParams {
    limit: i64,
    page: i64,
    updated_after: i64,
    exclude_deleted: bool,
}

/// 会话相关的 HTTP API 客户端
pub struct ChatApi {
    client: reqwest::Client,
    base_url: Url,
}

impl ChatApi {
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// 分页获取用户 `updated_at > updated_after` 的会话
    pub async fn get_chats_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Chat>> {
        const OP: &str = "获取会话列表";
        let operation_id = Uuid::new_v4().to_string();
        let url = endpoint(&self.base_url, &["chats", "user", user_id])?;

        debug!(
            "[ChatAPI] 📡 请求会话列表 URL: {}, 页码: {}, 每页: {}, updatedAfter: {}, 操作ID: {}",
            url, query.page.page, query.page.limit, query.updated_after, operation_id
        );

        let response = self
            .client
            .get(url)
            .header("operationID", &operation_id)
            .query(&ChatListParams {
                limit: query.page.limit,
                page: query.page.page,
                updated_after: query.updated_after,
                exclude_deleted: query.exclude_deleted,
            })
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;

        let page: Paginated<Chat> = handle_http_response(response, OP).await?;
        debug!(
            "[ChatAPI] ✅ 会话列表响应，本页 {} 条，总数 {}，hasNext: {}",
            page.data.len(),
            page.pagination.total_count,
            page.pagination.has_next
        );
        Ok(page)
    }

    pub async fn add_chat(&self, chat: &Chat) -> Result<()> {
        const OP: &str = "新增会话";
        let url = endpoint(&self.base_url, &["chats"])?;
        let response = self
            .client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .json(chat)
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }

    pub async fn add_chats(&self, chats: &[Chat]) -> Result<()> {
        const OP: &str = "批量新增会话";
        let url = endpoint(&self.base_url, &["chats", "bulk"])?;
        let response = self
            .client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .json(&serde_json::json!({ "chats": chats }))
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }

    /// 服务端合并接口：把本地变更的会话交给服务端按时间戳合并
    pub async fn sync_chats(
        &self,
        user_id: &str,
        chats: &[Chat],
        last_sync: Option<i64>,
    ) -> Result<()> {
        const OP: &str = "同步会话";
        let url = endpoint(&self.base_url, &["chats", "sync"])?;
        info!(
            "[ChatAPI] 📡 推送会话到服务端，数量: {}, lastSync: {:?}",
            chats.len(),
            last_sync
        );
        let response = self
            .client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .json(&serde_json::json!({
                "userId": user_id,
                "chats": chats,
                "lastSync": last_sync,
            }))
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        const OP: &str = "删除会话";
        let url = endpoint(&self.base_url, &["chats", chat_id])?;
        let response = self
            .client
            .delete(url)
            .header("operationID", Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }
}
