//! 远端存储契约
//!
//! 同步引擎只依赖 [`RemoteStore`] trait，不关心传输细节；
//! [`HttpRemoteStore`] 是基于 reqwest 的默认实现。

use crate::sync::chat::{Chat, ChatApi};
use crate::sync::error::{Result, SyncError};
use crate::sync::message::{Message, MessageApi};
use crate::sync::pagination::{PageRequest, Paginated};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::info;

/// 远端请求超时
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 远端分页查询条件（会话按 updated_at、消息按 created_at 过滤）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteQuery {
    pub updated_after: i64,
    pub exclude_deleted: bool,
    pub page: PageRequest,
}

impl RemoteQuery {
    pub fn new(updated_after: i64, exclude_deleted: bool, page: PageRequest) -> Self {
        Self {
            updated_after,
            exclude_deleted,
            page,
        }
    }

    pub fn next_page(self) -> Self {
        Self {
            page: self.page.next(),
            ..self
        }
    }
}

/// 在 base URL 后追加路径段（自动转义）
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SyncError::validation(format!("无效的后端地址: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// 远端存储：本地缓存契约在服务端的镜像
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_chats_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Chat>>;

    async fn add_chat(&self, chat: &Chat) -> Result<()>;

    async fn add_chats(&self, chats: &[Chat]) -> Result<()>;

    /// 服务端合并接口
    async fn sync_chats(&self, user_id: &str, chats: &[Chat], last_sync: Option<i64>)
        -> Result<()>;

    async fn delete_chat(&self, chat_id: &str) -> Result<()>;

    async fn get_messages_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Message>>;

    async fn add_message(&self, message: &Message) -> Result<()>;

    async fn add_messages(&self, messages: &[Message]) -> Result<()>;
}

/// 基于 HTTP 的远端存储
pub struct HttpRemoteStore {
    chats: ChatApi,
    messages: MessageApi,
}

impl HttpRemoteStore {
    /// 创建 HTTP 客户端；`credential` 存在时通过默认请求头附带 `Authorization: Bearer ...`
    pub fn new(backend_url: &str, credential: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(backend_url)
            .map_err(|e| SyncError::validation(format!("无效的后端地址 {}: {}", backend_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::validation(format!(
                "无效的后端地址: {}",
                backend_url
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = credential {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SyncError::validation("无效的 token"))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::http("创建 HTTP 客户端", e))?;

        info!("[Remote] 远端存储客户端已创建: {}", base_url);
        Ok(Self {
            chats: ChatApi::new(client.clone(), base_url.clone()),
            messages: MessageApi::new(client, base_url),
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_chats_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Chat>> {
        self.chats.get_chats_by_user_id(user_id, query).await
    }

    async fn add_chat(&self, chat: &Chat) -> Result<()> {
        self.chats.add_chat(chat).await
    }

    async fn add_chats(&self, chats: &[Chat]) -> Result<()> {
        self.chats.add_chats(chats).await
    }

    async fn sync_chats(
        &self,
        user_id: &str,
        chats: &[Chat],
        last_sync: Option<i64>,
    ) -> Result<()> {
        self.chats.sync_chats(user_id, chats, last_sync).await
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.chats.delete_chat(chat_id).await
    }

    async fn get_messages_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Message>> {
        self.messages.get_messages_by_user_id(user_id, query).await
    }

    async fn add_message(&self, message: &Message) -> Result<()> {
        self.messages.add_message(message).await
    }

    async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        self.messages.add_messages(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::message::Role;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn first_page(limit: i64) -> RemoteQuery {
        RemoteQuery::new(-1, true, PageRequest::first(limit).unwrap())
    }

    #[test]
    fn endpoint_escapes_segments_and_keeps_prefix() {
        let base = Url::parse("http://localhost:3000/api/").unwrap();
        let url = endpoint(&base, &["chats", "user", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/chats/user/a%20b%2Fc");
    }

    #[test]
    fn rejects_invalid_backend_url() {
        assert!(matches!(
            HttpRemoteStore::new("not a url", None),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            HttpRemoteStore::new("mailto:someone@example.com", None),
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn fetches_paginated_chats_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/user/u1"))
            .and(query_param("limit", "2"))
            .and(query_param("page", "0"))
            .and(query_param("updatedAfter", "-1"))
            .and(query_param("excludeDeleted", "true"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "chatId": "1", "userId": "u1", "title": "a", "createdAt": 1, "updatedAt": 1 },
                    { "chatId": "2", "userId": "u1", "title": "b", "createdAt": 2, "updatedAt": 2, "deletedAt": 2 }
                ],
                "pagination": { "totalCount": 3, "totalPages": 2, "currentPage": 0, "hasNext": true }
            })))
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), Some("secret")).unwrap();
        let page = remote
            .get_chats_by_user_id("u1", &first_page(2))
            .await
            .unwrap();

        assert_eq!(page.data.len(), 2);
        assert!(page.has_next());
        assert_eq!(page.data[1].deleted_at, Some(2));
    }

    #[tokio::test]
    async fn sync_chats_posts_merge_payload() {
        let server = MockServer::start().await;
        let chat = Chat::new("c1", "u1", "title").with_updated_at(10);
        Mock::given(method("POST"))
            .and(path("/chats/sync"))
            .and(body_json(serde_json::json!({
                "userId": "u1",
                "chats": [serde_json::to_value(&chat).unwrap()],
                "lastSync": 5
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        remote.sync_chats("u1", &[chat], Some(5)).await.unwrap();
    }

    #[tokio::test]
    async fn server_errors_carry_operation_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages/bulk"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({ "error": "db down" })),
            )
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        let err = remote
            .add_messages(&[Message::new("m1", "c1", "hi", Role::User)])
            .await
            .unwrap_err();

        match &err {
            SyncError::Api {
                operation,
                status,
                message,
            } => {
                assert_eq!(*operation, "批量新增消息");
                assert_eq!(*status, 500);
                assert_eq!(message, "db down");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/user/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        let err = remote
            .get_chats_by_user_id("u1", &first_page(10))
            .await
            .unwrap_err();

        match &err {
            SyncError::Decode { operation, .. } => assert_eq!(*operation, "获取会话列表"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.is_remote());
        assert!(!err.to_string().contains("(200)"));
    }

    #[tokio::test]
    async fn delete_chat_uses_chat_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/chats/c9"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        remote.delete_chat("c9").await.unwrap();
    }

    #[tokio::test]
    async fn messages_are_filtered_by_created_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/user/u1"))
            .and(query_param("createdAfter", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "messageId": "m1", "chatId": "c1", "content": "hi", "role": "assistant", "createdAt": 50 }
                ],
                "pagination": { "totalCount": 1, "totalPages": 1, "currentPage": 0, "hasNext": false }
            })))
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        let query = RemoteQuery::new(42, false, PageRequest::first(10).unwrap());
        let page = remote.get_messages_by_user_id("u1", &query).await.unwrap();
        assert_eq!(page.data[0].role, Role::Assistant);
        assert!(!page.has_next());
    }

    #[tokio::test]
    async fn unknown_message_roles_are_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/user/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "messageId": "m1", "chatId": "c1", "content": "hi", "role": "developer", "createdAt": 50 }
                ],
                "pagination": { "totalCount": 1, "totalPages": 1, "currentPage": 0, "hasNext": false }
            })))
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), None).unwrap();
        let page = remote
            .get_messages_by_user_id("u1", &first_page(10))
            .await
            .unwrap();
        assert_eq!(page.data[0].role, Role::Other("developer".to_string()));
    }
}
