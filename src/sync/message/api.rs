//! 消息 HTTP API 客户端

use crate::sync::error::{Result, SyncError};
use crate::sync::message::models::Message;
use crate::sync::pagination::Paginated;
use crate::sync::remote::{endpoint, RemoteQuery};
use crate::sync::types::{ensure_success, handle_http_response};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageListParams {
    limit: i64,
    page: i64,
    created_after: i64,
    exclude_deleted: bool,
}

/// 消息相关的 HTTP API 客户端
pub struct MessageApi {
    client: reqwest::Client,
    base_url: Url,
}

impl MessageApi {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// 分页获取用户 `created_at > query.updated_after` 的消息
    pub async fn get_messages_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Message>> {
        const OP: &str = "获取消息列表";
        let operation_id = Uuid::new_v4().to_string();
        let url = endpoint(&self.base_url, &["messages", "user", user_id])?;

        debug!(
            "[MsgAPI] 📡 请求消息列表 URL: {}, 页码: {}, 每页: {}, 操作ID: {}",
            url, query.page.page, query.page.limit, operation_id
        );

        let response = self
            .client
            .get(url)
            .header("operationID", &operation_id)
            .query(&MessageListParams {
                limit: query.page.limit,
                page: query.page.page,
                created_after: query.updated_after,
                exclude_deleted: query.exclude_deleted,
            })
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;

        handle_http_response(response, OP).await
    }

    pub async fn add_message(&self, message: &Message) -> Result<()> {
        const OP: &str = "新增消息";
        let url = endpoint(&self.base_url, &["messages"])?;
        let response = self
            .client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .json(message)
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }

    pub async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        const OP: &str = "批量新增消息";
        let url = endpoint(&self.base_url, &["messages", "bulk"])?;
        info!("[MsgAPI] 📡 推送消息到服务端，数量: {}", messages.len());
        let response = self
            .client
            .post(url)
            .header("operationID", Uuid::new_v4().to_string())
            .json(&serde_json::json!({ "messages": messages }))
            .send()
            .await
            .map_err(|e| SyncError::http(OP, e))?;
        ensure_success(response, OP).await
    }
}
