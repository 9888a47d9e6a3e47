//! 同步引擎
//!
//! 状态机：Uninitialized → Initializing → Active（周期同步） → Stopped
//!
//! - 登录：执行迁移，从上一次游标开始全量拉取会话和消息，游标设为拉取**之前**的快照时间，然后启动周期任务
//! - 周期：会话对账（拉取 + 推送）→ 消息对账（拉取 + 推送）→ 清除已删除会话 → 推进游标
//! - 登出：停止周期任务，把游标之后的会话和所有未同步消息推送到远端，清空本地缓存与游标
//!
//! 任意一步失败时本轮中止、游标不推进，下一轮从同一个游标重试。

use crate::sync::cache::CacheStore;
use crate::sync::chat::Chat;
use crate::sync::error::{PhaseExt, Result, SyncError};
use crate::sync::listener::{EmptySyncListener, SyncListener};
use crate::sync::models::{LoginConfig, LogoutConfig, SyncReport, SyncSettings, SyncState};
use crate::sync::now_millis;
use crate::sync::pagination::PageRequest;
use crate::sync::remote::{HttpRemoteStore, RemoteQuery, RemoteStore};
use crate::sync::scheduler::{Job, PeriodicTask};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

const SYNC_TASK_NAME: &str = "chat-sync";
const NOT_LOGGED_IN: &str = "同步引擎未登录，请先调用 login()";

/// 远端会话与本地副本对比后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 写入本地缓存
    Upsert,
    /// 保留本地副本
    Skip,
}

/// 会话冲突策略
///
/// - 本地不存在：写入
/// - 本地已软删除：跳过（本地删除在缓存清空之前不可逆）
/// - 远端已删除：写入（删除同步到本地）
/// - 远端更新时间更晚：写入，否则跳过（本地副本会在推送阶段上传）
pub fn resolve_remote_chat(remote: &Chat, cached: Option<&Chat>) -> Resolution {
    match cached {
        None => Resolution::Upsert,
        Some(local) if local.is_deleted() => Resolution::Skip,
        Some(_) if remote.is_deleted() => Resolution::Upsert,
        Some(local) if remote.updated_at > local.updated_at => Resolution::Upsert,
        Some(_) => Resolution::Skip,
    }
}

fn cursor_value(cursor: Option<i64>) -> i64 {
    cursor.unwrap_or(-1)
}

/// 分页拉取 `updated_after` 之后更新的远端会话，按冲突策略写入缓存
///
/// 返回本轮从远端写入的会话 ID，推送阶段会跳过它们。
pub(crate) async fn pull_chats(
    cache: &CacheStore,
    remote: &dyn RemoteStore,
    user_id: &str,
    page_size: i64,
    updated_after: i64,
    exclude_deleted: bool,
) -> Result<HashSet<String>> {
    let mut query = RemoteQuery::new(updated_after, exclude_deleted, PageRequest::first(page_size)?);
    let mut resolved = HashSet::new();

    loop {
        let page = remote.get_chats_by_user_id(user_id, &query).await?;
        let has_next = page.has_next();
        if page.data.is_empty() {
            break;
        }

        let ids: Vec<String> = page.data.iter().map(|c| c.chat_id.clone()).collect();
        let cached: HashMap<String, Chat> = cache
            .get_chats_by_chat_ids(&ids)
            .await?
            .into_iter()
            .map(|c| (c.chat_id.clone(), c))
            .collect();

        let mut to_upsert = Vec::new();
        for mut chat in page.data {
            let local = cached.get(&chat.chat_id);
            match resolve_remote_chat(&chat, local) {
                Resolution::Upsert => {
                    // updated_at 不回退
                    if let Some(local) = local {
                        chat.updated_at = chat.updated_at.max(local.updated_at);
                    }
                    resolved.insert(chat.chat_id.clone());
                    to_upsert.push(chat);
                }
                Resolution::Skip => {
                    debug!("[SyncEngine] 保留本地会话: {}", chat.chat_id);
                }
            }
        }
        cache.upsert_chats(&to_upsert).await?;
        debug!(
            "[SyncEngine] 会话第 {} 页，写入 {} 条",
            query.page.page,
            to_upsert.len()
        );

        if !has_next {
            break;
        }
        query = query.next_page();
    }
    Ok(resolved)
}

/// 把 `cursor` 之后更新的本地会话（包括软删除的）推送到远端合并接口
///
/// 按会话 ID 做 keyset 分页，推送期间本地删除其他会话不会让墓碑被跳过。
pub(crate) async fn push_chats(
    cache: &CacheStore,
    remote: &dyn RemoteStore,
    user_id: &str,
    page_size: i64,
    cursor: Option<i64>,
    skip: &HashSet<String>,
) -> Result<usize> {
    let mut after_id: Option<String> = None;
    let mut pushed = 0;

    loop {
        let rows = cache
            .get_chats_changed_after(user_id, cursor_value(cursor), after_id.as_deref(), page_size)
            .await?;
        let full_page = rows.len() as i64 == page_size;
        after_id = rows.last().map(|c| c.chat_id.clone());

        let batch: Vec<Chat> = rows
            .into_iter()
            .filter(|c| !skip.contains(&c.chat_id))
            .collect();
        if !batch.is_empty() {
            remote.sync_chats(user_id, &batch, cursor).await?;
            pushed += batch.len();
        }

        if !full_page || after_id.is_none() {
            break;
        }
    }
    Ok(pushed)
}

/// 分页拉取 `created_after` 之后的远端消息，以已同步状态写入缓存
///
/// 所属会话不在本地缓存中的消息会被丢弃。
pub(crate) async fn pull_messages(
    cache: &CacheStore,
    remote: &dyn RemoteStore,
    user_id: &str,
    page_size: i64,
    created_after: i64,
    exclude_deleted: bool,
) -> Result<usize> {
    let mut query = RemoteQuery::new(created_after, exclude_deleted, PageRequest::first(page_size)?);
    let mut pulled = 0;

    loop {
        let page = remote.get_messages_by_user_id(user_id, &query).await?;
        let has_next = page.has_next();
        if page.data.is_empty() {
            break;
        }

        let chat_ids: Vec<String> = page
            .data
            .iter()
            .map(|m| m.chat_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let known: HashSet<String> = cache
            .get_chats_by_chat_ids(&chat_ids)
            .await?
            .into_iter()
            .map(|c| c.chat_id)
            .collect();

        let (messages, orphans): (Vec<_>, Vec<_>) = page
            .data
            .into_iter()
            .partition(|m| known.contains(&m.chat_id));
        if !orphans.is_empty() {
            warn!(
                "[SyncEngine] 丢弃 {} 条所属会话不在本地的消息，例如: {}",
                orphans.len(),
                orphans[0].message_id
            );
        }

        cache.upsert_messages(&messages, Some(true)).await?;
        pulled += messages.len();

        if !has_next {
            break;
        }
        query = query.next_page();
    }
    Ok(pulled)
}

/// 反复取出并推送未同步消息，直到没有剩余
///
/// 推送失败时把这一批重新标记为未同步，然后返回错误。
pub(crate) async fn push_messages(
    cache: &CacheStore,
    remote: &dyn RemoteStore,
    user_id: &str,
    batch_size: i64,
) -> Result<usize> {
    let mut pushed = 0;

    loop {
        let batch = cache
            .get_and_mark_unsynced_messages_by_user_id(user_id, batch_size)
            .await?;
        if batch.is_empty() {
            break;
        }

        if let Err(e) = remote.add_messages(&batch).await {
            let ids: Vec<String> = batch.iter().map(|m| m.message_id.clone()).collect();
            match cache.mark_messages_unsynced(&ids).await {
                Ok(n) => warn!("[SyncEngine] 推送消息失败，已归还 {} 条未同步消息", n),
                Err(requeue) => error!("[SyncEngine] 归还未同步消息失败: {}", requeue),
            }
            return Err(e);
        }
        pushed += batch.len();
    }
    Ok(pushed)
}

/// 一次登录会话：缓存、远端和同步参数
struct Session {
    settings: SyncSettings,
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteStore>,
    listener: Arc<dyn SyncListener>,
    last_sync: Arc<Mutex<Option<i64>>>,
    /// 串行化所有对账轮次（后台周期、sync_now、登出刷写）
    cycle_lock: Mutex<()>,
    /// 登出完成后置位，之后的轮次直接拒绝
    closed: AtomicBool,
}

impl Session {
    async fn cycle(&self) -> Result<SyncReport> {
        let _guard = self.cycle_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::invalid_state("会话已登出"));
        }

        self.listener.on_sync_server_start().await;
        match self.reconcile().await {
            Ok(report) => {
                info!(
                    "[SyncEngine] ✅ 同步完成: 拉取会话 {}, 推送会话 {}, 拉取消息 {}, 推送消息 {}, 清除会话 {}",
                    report.chats_pulled,
                    report.chats_pushed,
                    report.messages_pulled,
                    report.messages_pushed,
                    report.chats_purged
                );
                self.listener.on_sync_server_finish(report).await;
                Ok(report)
            }
            Err(e) => {
                self.listener.on_sync_server_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<SyncReport> {
        let cursor = *self.last_sync.lock().await;
        let snapshot = now_millis();
        let settings = &self.settings;
        let cache = self.cache.as_ref();
        let remote = self.remote.as_ref();
        debug!(
            "[SyncEngine] 🔄 开始同步，用户: {}, 游标: {:?}",
            settings.user_id, cursor
        );

        let mut report = SyncReport::default();

        let resolved = pull_chats(
            cache,
            remote,
            &settings.user_id,
            settings.page_size,
            cursor_value(cursor),
            false,
        )
        .await
        .phase("拉取远端会话失败")?;
        report.chats_pulled = resolved.len();

        report.chats_pushed = push_chats(
            cache,
            remote,
            &settings.user_id,
            settings.page_size,
            cursor,
            &resolved,
        )
        .await
        .phase("推送本地会话失败")?;

        report.messages_pulled = pull_messages(
            cache,
            remote,
            &settings.user_id,
            settings.page_size,
            cursor_value(cursor),
            settings.exclude_deleted,
        )
        .await
        .phase("拉取远端消息失败")?;

        report.messages_pushed = push_messages(cache, remote, &settings.user_id, settings.page_size)
            .await
            .phase("推送本地消息失败")?;

        // 早于本轮快照的墓碑已经在之前的推送阶段上传过
        report.chats_purged = cache
            .clear_deleted_chats(snapshot)
            .await
            .phase("清除已删除会话失败")?;

        *self.last_sync.lock().await = Some(snapshot);
        Ok(report)
    }

    /// 后台轮次：错误只记录日志
    async fn run_background_cycle(self: Arc<Self>) {
        if let Err(e) = self.cycle().await {
            error!("[SyncEngine] ❌ 周期同步失败，下一轮重试: {}", e);
        }
    }

    /// 登出前的最终推送，然后清空缓存
    async fn flush_and_wipe(&self, page_size: i64) -> Result<()> {
        let cursor = *self.last_sync.lock().await;
        let user_id = &self.settings.user_id;
        let cache = self.cache.as_ref();
        let remote = self.remote.as_ref();

        let chats = push_chats(cache, remote, user_id, page_size, cursor, &HashSet::new())
            .await
            .phase("登出时推送会话失败")?;
        let messages = push_messages(cache, remote, user_id, page_size)
            .await
            .phase("登出时推送消息失败")?;
        info!(
            "[SyncEngine] 登出刷写完成，推送会话 {}, 推送消息 {}",
            chats, messages
        );

        cache.clear_message().await.phase("清空本地消息失败")?;
        cache.clear_chat().await.phase("清空本地会话失败")?;
        Ok(())
    }
}

/// 同步引擎
///
/// 每个登录用户一个实例，由调用方持有。丢弃引擎会让后台周期任务在当前一轮结束后退出。
pub struct SyncEngine {
    state: RwLock<SyncState>,
    session: RwLock<Option<Arc<Session>>>,
    task: Mutex<Option<PeriodicTask>>,
    last_sync: Arc<Mutex<Option<i64>>>,
    listener: Arc<dyn SyncListener>,
    /// 串行化 login / logout
    lifecycle: Mutex<()>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    /// 创建同步引擎（使用默认空监听器）
    pub fn new() -> Self {
        Self::with_listener(Arc::new(EmptySyncListener))
    }

    /// 创建同步引擎（带自定义监听器）
    pub fn with_listener(listener: Arc<dyn SyncListener>) -> Self {
        Self {
            state: RwLock::new(SyncState::Uninitialized),
            session: RwLock::new(None),
            task: Mutex::new(None),
            last_sync: Arc::new(Mutex::new(None)),
            listener,
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> SyncState {
        *self.state.read().await
    }

    /// 上一次成功同步的游标（毫秒），未登录或已登出时为 `None`
    pub async fn last_sync(&self) -> Option<i64> {
        *self.last_sync.lock().await
    }

    /// 当前登录会话的本地缓存
    pub async fn cache(&self) -> Result<Arc<CacheStore>> {
        Ok(self.active_session().await?.cache.clone())
    }

    /// 使用 HTTP 远端存储登录
    pub async fn login(&self, config: LoginConfig) -> Result<()> {
        config.validate()?;
        let remote = HttpRemoteStore::new(&config.backend_url, config.credential.as_deref())?;
        self.login_with_remote(config, Arc::new(remote)).await
    }

    /// 使用指定的远端存储登录
    pub async fn login_with_remote(
        &self,
        config: LoginConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<()> {
        config.validate()?;
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.state.write().await;
            match *state {
                SyncState::Uninitialized | SyncState::Stopped => {
                    *state = SyncState::Initializing;
                }
                other => {
                    return Err(SyncError::invalid_state(format!(
                        "当前状态 {} 不允许登录",
                        other
                    )));
                }
            }
        }

        info!(
            "[SyncEngine] 用户 {} 登录，后端: {}",
            config.user_id, config.backend_url
        );
        match self.initialize_session(config, remote).await {
            Ok(session) => {
                *self.session.write().await = Some(session.clone());
                self.start_periodic(session).await;
                *self.state.write().await = SyncState::Active;
                info!("[SyncEngine] ✅ 登录完成，周期同步已启动");
                Ok(())
            }
            Err(e) => {
                error!("[SyncEngine] ❌ 登录初始化失败: {}", e);
                *self.state.write().await = SyncState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn initialize_session(
        &self,
        config: LoginConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Session>> {
        let settings = config.settings();
        let LoginConfig { db, migrations, .. } = config;

        let prior = *self.last_sync.lock().await;
        // 快照必须在拉取之前，拉取期间远端的更新留给下一轮
        let snapshot = now_millis();

        let mut cache = CacheStore::new(db);
        for (from_version, step) in migrations {
            cache.register_migration_arc(from_version, step);
        }
        cache.initialize().await.phase("初始化本地缓存失败")?;
        let cache = Arc::new(cache);

        let chats = pull_chats(
            &cache,
            remote.as_ref(),
            &settings.user_id,
            settings.page_size,
            cursor_value(prior),
            settings.exclude_deleted,
        )
        .await
        .phase("初始化会话失败")?;
        let messages = pull_messages(
            &cache,
            remote.as_ref(),
            &settings.user_id,
            settings.page_size,
            cursor_value(prior),
            settings.exclude_deleted,
        )
        .await
        .phase("初始化消息失败")?;
        info!(
            "[SyncEngine] 初始拉取完成，会话 {} 条，消息 {} 条",
            chats.len(),
            messages
        );

        *self.last_sync.lock().await = Some(snapshot);

        Ok(Arc::new(Session {
            settings,
            cache,
            remote,
            listener: self.listener.clone(),
            last_sync: self.last_sync.clone(),
            cycle_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn start_periodic(&self, session: Arc<Session>) {
        let period = session.settings.interval;
        let job: Job = Arc::new(move || session.clone().run_background_cycle().boxed());
        let task = PeriodicTask::spawn(SYNC_TASK_NAME, period, job);
        let previous = self.task.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    async fn stop_periodic(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    async fn active_session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(SyncError::NotInitialized(NOT_LOGGED_IN))
    }

    /// 立即执行一轮同步（与后台周期串行），错误返回给调用方
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let session = self.active_session().await?;
        session.cycle().await
    }

    /// 登出：最终推送后清空本地缓存和游标
    ///
    /// 从未登录时为空操作。推送失败时缓存保持不变、周期同步恢复，可以再次调用登出重试。
    pub async fn logout(&self, config: LogoutConfig) -> Result<()> {
        if config.page_size <= 0 {
            return Err(SyncError::validation(format!(
                "page_size 必须为正数，当前: {}",
                config.page_size
            )));
        }
        let _lifecycle = self.lifecycle.lock().await;

        let Some(session) = self.session.read().await.clone() else {
            debug!("[SyncEngine] 未登录，忽略登出");
            return Ok(());
        };

        info!("[SyncEngine] 用户 {} 登出", session.settings.user_id);
        self.stop_periodic().await;

        let guard = session.cycle_lock.lock().await;
        if let Err(e) = session.flush_and_wipe(config.page_size).await {
            drop(guard);
            error!("[SyncEngine] ❌ 登出失败，保留本地缓存: {}", e);
            self.start_periodic(session).await;
            return Err(e);
        }
        session.closed.store(true, Ordering::SeqCst);
        drop(guard);

        *self.last_sync.lock().await = None;
        *self.session.write().await = None;
        *self.state.write().await = SyncState::Stopped;
        info!("[SyncEngine] ⏹️ 已登出，本地缓存已清空");
        Ok(())
    }
}
