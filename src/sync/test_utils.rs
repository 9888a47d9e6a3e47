//! 测试辅助：内存版远端存储、已初始化的本地缓存、测试日志

use crate::sync::cache::CacheStore;
use crate::sync::chat::Chat;
use crate::sync::db::create_sqlite_pool;
use crate::sync::error::{Result, SyncError};
use crate::sync::message::Message;
use crate::sync::pagination::Paginated;
use crate::sync::remote::{RemoteQuery, RemoteStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, Once};
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,chat_cache_sync=debug,sqlx=warn");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// 临时目录下新建并初始化的缓存；`TempDir` 需要保持存活
pub(crate) async fn open_cache() -> (tempfile::TempDir, CacheStore) {
    let (dir, pool) = temp_pool().await;
    let cache = CacheStore::new(pool);
    cache.initialize().await.unwrap();
    (dir, cache)
}

pub(crate) async fn temp_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    init_test_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let pool = create_sqlite_pool(path.to_str().unwrap(), 1).await.unwrap();
    (dir, pool)
}

/// 一次 `sync_chats` 调用的记录
#[derive(Debug, Clone)]
pub(crate) struct SyncCall {
    pub user_id: String,
    pub chats: Vec<Chat>,
    pub last_sync: Option<i64>,
}

/// 内存版远端存储，结果按 ID 升序分页；可以对指定操作注入失败或延迟
#[derive(Default)]
pub(crate) struct MemoryRemote {
    chats: Mutex<BTreeMap<String, Chat>>,
    /// message_id -> (user_id, message)
    messages: Mutex<BTreeMap<String, (String, Message)>>,
    sync_calls: Mutex<Vec<SyncCall>>,
    pushed_messages: Mutex<Vec<Message>>,
    failures: Mutex<HashSet<&'static str>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_chat(&self, chat: Chat) {
        self.chats.lock().unwrap().insert(chat.chat_id.clone(), chat);
    }

    pub fn put_message(&self, user_id: &str, message: Message) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.message_id.clone(), (user_id.to_string(), message));
    }

    pub fn chat(&self, chat_id: &str) -> Option<Chat> {
        self.chats.lock().unwrap().get(chat_id).cloned()
    }

    pub fn sync_calls(&self) -> Vec<SyncCall> {
        self.sync_calls.lock().unwrap().clone()
    }

    /// 所有 `sync_chats` 推送过的会话 ID（按推送顺序）
    pub fn synced_chat_ids(&self) -> Vec<String> {
        self.sync_calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|call| call.chats.iter().map(|c| c.chat_id.clone()))
            .collect()
    }

    pub fn pushed_messages(&self) -> Vec<Message> {
        self.pushed_messages.lock().unwrap().clone()
    }

    /// 让操作失败：`get_chats` / `sync_chats` / `get_messages` / `add_messages`
    pub fn fail_on(&self, operation: &'static str) {
        self.failures.lock().unwrap().insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// 让操作在返回前先等待 `delay`，操作名同 [`Self::fail_on`]
    pub fn delay_on(&self, operation: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(operation, delay);
    }

    async fn check(&self, operation: &'static str) -> Result<()> {
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().contains(operation) {
            return Err(SyncError::api(operation, 503, "injected failure"));
        }
        Ok(())
    }

    fn page_of<T: Clone>(items: Vec<T>, query: &RemoteQuery) -> Paginated<T> {
        let total = items.len() as i64;
        let data = items
            .into_iter()
            .skip(query.page.offset() as usize)
            .take(query.page.limit as usize)
            .collect();
        Paginated::new(data, total, query.page)
    }

    fn owner_of(&self, chat_id: &str) -> String {
        self.chats
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|c| c.user_id.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_chats_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Chat>> {
        self.check("get_chats").await?;
        let matching: Vec<Chat> = self
            .chats
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id && c.updated_at > query.updated_after)
            .filter(|c| !query.exclude_deleted || c.deleted_at.is_none())
            .cloned()
            .collect();
        Ok(Self::page_of(matching, query))
    }

    async fn add_chat(&self, chat: &Chat) -> Result<()> {
        self.check("add_chat").await?;
        self.put_chat(chat.clone());
        Ok(())
    }

    async fn add_chats(&self, chats: &[Chat]) -> Result<()> {
        self.check("add_chats").await?;
        for chat in chats {
            self.put_chat(chat.clone());
        }
        Ok(())
    }

    async fn sync_chats(
        &self,
        user_id: &str,
        chats: &[Chat],
        last_sync: Option<i64>,
    ) -> Result<()> {
        self.check("sync_chats").await?;
        {
            let mut stored = self.chats.lock().unwrap();
            for chat in chats {
                let newer = stored
                    .get(&chat.chat_id)
                    .map_or(true, |existing| chat.updated_at >= existing.updated_at);
                if newer {
                    stored.insert(chat.chat_id.clone(), chat.clone());
                }
            }
        }
        self.sync_calls.lock().unwrap().push(SyncCall {
            user_id: user_id.to_string(),
            chats: chats.to_vec(),
            last_sync,
        });
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.check("delete_chat").await?;
        self.chats.lock().unwrap().remove(chat_id);
        Ok(())
    }

    async fn get_messages_by_user_id(
        &self,
        user_id: &str,
        query: &RemoteQuery,
    ) -> Result<Paginated<Message>> {
        self.check("get_messages").await?;
        let matching: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|(owner, m)| owner == user_id && m.created_at > query.updated_after)
            .map(|(_, m)| m.clone())
            .collect();
        Ok(Self::page_of(matching, query))
    }

    async fn add_message(&self, message: &Message) -> Result<()> {
        self.add_messages(std::slice::from_ref(message)).await
    }

    async fn add_messages(&self, messages: &[Message]) -> Result<()> {
        self.check("add_messages").await?;
        for message in messages {
            let owner = self.owner_of(&message.chat_id);
            self.put_message(&owner, message.clone());
            self.pushed_messages.lock().unwrap().push(message.clone());
        }
        Ok(())
    }
}
