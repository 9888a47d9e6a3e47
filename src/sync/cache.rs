//! 本地缓存门面
//!
//! 在 DAO 之上提供：
//! - 初始化闸门：`initialize()`（执行迁移）之前的任何操作都返回 [`SyncError::NotInitialized`]
//! - 组合操作的事务：插入消息 + 刷新会话时间戳、重命名 + 刷新时间戳、取出并标记未同步消息
//!
//! 缓存是单写者（一个进程、一个本地库），除上述事务外不需要额外加锁。

use crate::sync::chat::{Chat, ChatDao, ChatSummary, TimestampedTable};
use crate::sync::error::{Result, SyncError};
use crate::sync::message::{Message, MessageDao};
use crate::sync::migration::{Migration, Migrator};
use crate::sync::now_millis;
use crate::sync::pagination::{PageRequest, Paginated};
use sqlx::pool::PoolConnection;
use sqlx::{Pool, Sqlite};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NOT_INITIALIZED: &str = "会话缓存未初始化，请先调用 initialize()";

/// 本地会话/消息缓存
pub struct CacheStore {
    pool: Pool<Sqlite>,
    migrator: Migrator,
    initialized: AtomicBool,
}

impl CacheStore {
    /// 创建缓存（预置基础 schema 迁移），需调用 [`Self::initialize`] 后才能使用
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            migrator: Migrator::with_base_schema(),
            initialized: AtomicBool::new(false),
        }
    }

    /// 登记额外的迁移步骤（从 `from_version` 升级到 `from_version + 1`）
    pub fn register_migration(&mut self, from_version: i64, step: impl Migration + 'static) {
        self.migrator.register(from_version, step);
    }

    pub fn register_migration_arc(&mut self, from_version: i64, step: Arc<dyn Migration>) {
        self.migrator.register_arc(from_version, step);
    }

    /// 执行迁移并打开闸门，返回当前 schema 版本；可重复调用
    pub async fn initialize(&self) -> Result<i64> {
        let version = self.migrator.initialize(&self.pool).await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!("[Cache] 本地缓存已初始化，schema 版本: {}", version);
        Ok(version)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SyncError::NotInitialized(NOT_INITIALIZED))
        }
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>> {
        self.ensure_initialized()?;
        Ok(self.pool.acquire().await?)
    }

    // ---------------------------------------------------------------------
    // 会话
    // ---------------------------------------------------------------------

    /// 插入一条会话；chat_id 已存在时失败（合并场景请用 [`Self::upsert_chats`]）
    pub async fn add_chat(
        &self,
        chat_id: &str,
        user_id: &str,
        title: &str,
        updated_at: Option<i64>,
        deleted_at: Option<i64>,
    ) -> Result<Chat> {
        let mut conn = self.conn().await?;
        let now = now_millis();
        let chat = Chat {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: updated_at.unwrap_or(now),
            deleted_at,
        };
        ChatDao::insert(&mut conn, &chat).await.map_err(|e| {
            error!("[Cache] 新增会话失败 chatId={}: {}", chat_id, e);
            SyncError::from(e)
        })?;
        Ok(chat)
    }

    /// 批量插入或更新会话，空输入为空操作
    pub async fn upsert_chats(&self, chats: &[Chat]) -> Result<()> {
        let mut conn = self.conn().await?;
        if chats.is_empty() {
            return Ok(());
        }
        ChatDao::upsert_many(&mut conn, chats).await?;
        Ok(())
    }

    /// 分页查询用户在 `updated_after` 之后更新的会话
    pub async fn get_chats_by_user_id(
        &self,
        user_id: &str,
        updated_after: i64,
        limit: i64,
        page: i64,
        exclude_deleted: bool,
    ) -> Result<Paginated<Chat>> {
        let request = PageRequest::new(limit, page)?;
        let mut conn = self.conn().await?;
        let total = ChatDao::count_by_user(&mut conn, user_id, updated_after, exclude_deleted).await?;
        let chats =
            ChatDao::list_by_user(&mut conn, user_id, updated_after, request, exclude_deleted)
                .await?;
        debug!(
            "[Cache] 用户 {} 会话第 {} 页，本页 {} 条，共 {} 条",
            user_id,
            page,
            chats.len(),
            total
        );
        Ok(Paginated::new(chats, total, request))
    }

    /// 按会话 ID 顺序分批读取 `updated_after` 之后变更的会话（含软删除）
    ///
    /// 下一批以上一批最后一条的 ID 作为 `after_id`，批次之间删除或新增行不会造成遗漏。
    pub async fn get_chats_changed_after(
        &self,
        user_id: &str,
        updated_after: i64,
        after_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Chat>> {
        let request = PageRequest::first(limit)?;
        let mut conn = self.conn().await?;
        let chats =
            ChatDao::list_changed_after(&mut conn, user_id, updated_after, after_id, request.limit)
                .await?;
        debug!(
            "[Cache] 用户 {} 在 {:?} 之后的变更会话 {} 条",
            user_id,
            after_id,
            chats.len()
        );
        Ok(chats)
    }

    /// 与 [`Self::get_chats_by_user_id`] 过滤条件一致的总数，用于计算总页数
    pub async fn count_chats_by_user_id(
        &self,
        user_id: &str,
        updated_after: i64,
        exclude_deleted: bool,
    ) -> Result<i64> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::count_by_user(&mut conn, user_id, updated_after, exclude_deleted).await?)
    }

    /// 按 chat_id 批量查询（不保证顺序）
    pub async fn get_chats_by_chat_ids(&self, chat_ids: &[String]) -> Result<Vec<Chat>> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::get_by_ids(&mut conn, chat_ids).await?)
    }

    /// 全部会话及其消息数、最近活跃时间
    pub async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::list_summaries(&mut conn).await?)
    }

    /// 物理删除会话，消息级联删除；返回是否删除了记录
    pub async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::delete(&mut conn, chat_id).await? > 0)
    }

    /// 软删除会话（可以通过再次 upsert 恢复）
    pub async fn mark_chat_as_deleted(&self, chat_id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let affected = ChatDao::mark_deleted(&mut conn, chat_id, now_millis()).await?;
        if affected == 0 {
            warn!("[Cache] 软删除的会话不存在: {}", chat_id);
        }
        Ok(affected > 0)
    }

    /// 重命名会话并刷新 updated_at（同一事务）
    pub async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<bool> {
        self.ensure_initialized()?;
        let mut tx = self.pool.begin().await?;

        let result = async {
            let renamed = ChatDao::rename(&mut tx, chat_id, title).await?;
            ChatDao::touch(&mut tx, TimestampedTable::Chats, chat_id, now_millis()).await?;
            Ok::<_, sqlx::Error>(renamed > 0)
        }
        .await;

        match result {
            Ok(renamed) => {
                tx.commit().await?;
                Ok(renamed)
            }
            Err(e) => {
                error!("[Cache] 重命名会话失败 chatId={}: {}", chat_id, e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("[Cache] 回滚失败: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    /// 刷新某行的 updated_at
    pub async fn update_table_timestamp(&self, table: TimestampedTable, id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::touch(&mut conn, table, id, now_millis()).await? > 0)
    }

    /// 物理清除 `updated_at < before` 的已软删除会话，返回清除数量
    pub async fn clear_deleted_chats(&self, before: i64) -> Result<u64> {
        let mut conn = self.conn().await?;
        let purged = ChatDao::purge_deleted(&mut conn, before).await?;
        if purged > 0 {
            info!("[Cache] 清除已删除会话 {} 条", purged);
        }
        Ok(purged)
    }

    /// 清空会话表（消息级联删除），仅在登出时使用
    pub async fn clear_chat(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(ChatDao::clear(&mut conn).await?)
    }

    // ---------------------------------------------------------------------
    // 消息
    // ---------------------------------------------------------------------

    /// 插入消息并刷新所属会话的 updated_at（同一事务，失败整体回滚）
    pub async fn add_message(&self, message: &Message) -> Result<()> {
        self.ensure_initialized()?;
        let mut tx = self.pool.begin().await?;

        let result = async {
            MessageDao::insert(&mut tx, message).await?;
            ChatDao::touch(&mut tx, TimestampedTable::Chats, &message.chat_id, now_millis())
                .await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                error!(
                    "[Cache] 新增消息失败 messageId={}, chatId={}: {}",
                    message.message_id, message.chat_id, e
                );
                if let Err(rollback) = tx.rollback().await {
                    warn!("[Cache] 回滚失败: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    /// 批量插入或更新消息；`is_synced` 为 `Some` 时统一覆盖同步标记
    pub async fn upsert_messages(&self, messages: &[Message], is_synced: Option<bool>) -> Result<()> {
        let mut conn = self.conn().await?;
        if messages.is_empty() {
            return Ok(());
        }
        MessageDao::upsert_many(&mut conn, messages, is_synced).await?;
        Ok(())
    }

    pub async fn get_messages_by_chat_id(&self, chat_id: &str) -> Result<Vec<Message>> {
        let mut conn = self.conn().await?;
        Ok(MessageDao::list_by_chat(&mut conn, chat_id).await?)
    }

    /// 原子地取出最多 `limit` 条未同步消息（最新在前）并标记为已同步
    ///
    /// 读取与标记在同一事务中完成，保证每条消息只会被交给推送步骤一次。
    pub async fn get_and_mark_unsynced_messages_by_user_id(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        if limit <= 0 {
            return Err(SyncError::validation(format!(
                "limit 必须为正数，当前: {}",
                limit
            )));
        }
        self.ensure_initialized()?;
        let mut tx = self.pool.begin().await?;

        let result = async {
            let mut messages = MessageDao::list_unsynced_by_user(&mut tx, user_id, limit).await?;
            let ids: Vec<String> = messages.iter().map(|m| m.message_id.clone()).collect();
            MessageDao::set_synced(&mut tx, &ids, true).await?;
            for message in messages.iter_mut() {
                message.is_synced = true;
            }
            Ok::<_, sqlx::Error>(messages)
        }
        .await;

        match result {
            Ok(messages) => {
                tx.commit().await?;
                debug!(
                    "[Cache] 取出并标记未同步消息 {} 条，用户: {}",
                    messages.len(),
                    user_id
                );
                Ok(messages)
            }
            Err(e) => {
                error!("[Cache] 取出未同步消息失败，用户: {}: {}", user_id, e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("[Cache] 回滚失败: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    /// 把消息重新标记为未同步（推送失败时归还）
    pub async fn mark_messages_unsynced(&self, message_ids: &[String]) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(MessageDao::set_synced(&mut conn, message_ids, false).await?)
    }

    pub async fn count_unsynced_messages_by_user_id(&self, user_id: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        Ok(MessageDao::count_unsynced_by_user(&mut conn, user_id).await?)
    }

    /// 清空消息表，仅在登出时使用
    pub async fn clear_message(&self) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(MessageDao::clear(&mut conn).await?)
    }
}
