//! 本地缓存 schema 迁移
//!
//! 版本号保存在 `PRAGMA user_version` 中。每个迁移步骤登记在它的**起始**版本上，
//! `initialize()` 从当前版本开始，只要存在对应步骤就执行并把版本加一，直到没有后续步骤。
//! 一次 `initialize()` 中的所有步骤在同一个事务里执行，任何一步失败都会整体回滚。

use crate::sync::error::{Result, SyncError};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// 版本 0 -> 1：会话表、消息表及索引
pub const BASE_SCHEMA_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER DEFAULT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY NOT NULL,
        chat_id TEXT NOT NULL,
        content TEXT NOT NULL,
        image_url TEXT,
        role TEXT NOT NULL,
        prompt TEXT,
        created_at INTEGER NOT NULL,
        is_synced INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (chat_id) REFERENCES chats (id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id);
    CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role);
    CREATE INDEX IF NOT EXISTS idx_chats_user_updated ON chats(user_id, updated_at);
"#;

/// 一个 schema 升级步骤，在迁移事务内执行
#[async_trait]
pub trait Migration: Send + Sync {
    async fn apply(&self, conn: &mut SqliteConnection) -> Result<()>;
}

/// 纯 SQL 迁移步骤（可包含多条语句）
#[derive(Debug, Clone)]
pub struct SqlMigration {
    sql: String,
}

impl SqlMigration {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

#[async_trait]
impl Migration for SqlMigration {
    async fn apply(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&self.sql)).await?;
        Ok(())
    }
}

/// 迁移器：按起始版本登记步骤
#[derive(Clone, Default)]
pub struct Migrator {
    steps: BTreeMap<i64, Arc<dyn Migration>>,
}

impl Migrator {
    /// 空迁移器（不含基础 schema）
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置了版本 0 -> 1 基础 schema 的迁移器
    pub fn with_base_schema() -> Self {
        let mut migrator = Self::new();
        migrator.register(0, SqlMigration::new(BASE_SCHEMA_SQL));
        migrator
    }

    /// 登记从 `from_version` 升级到 `from_version + 1` 的步骤；同一版本重复登记时后者覆盖前者
    pub fn register(&mut self, from_version: i64, step: impl Migration + 'static) {
        self.register_arc(from_version, Arc::new(step));
    }

    pub fn register_arc(&mut self, from_version: i64, step: Arc<dyn Migration>) {
        if self.steps.insert(from_version, step).is_some() {
            debug!("[Migrator] 覆盖已登记的迁移步骤，起始版本: {}", from_version);
        }
    }

    /// 最新版本号（没有任何步骤时为 0）
    pub fn latest_version(&self) -> i64 {
        self.steps.keys().next_back().map_or(0, |v| v + 1)
    }

    /// 读取当前 schema 版本
    pub async fn current_version(pool: &Pool<Sqlite>) -> Result<i64> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await?;
        Ok(version)
    }

    /// 执行所有待执行的迁移，返回迁移后的版本号
    ///
    /// 已是最新版本时不做任何修改，因此可以在每次进程启动时重复调用。
    pub async fn initialize(&self, pool: &Pool<Sqlite>) -> Result<i64> {
        let mut tx = pool.begin().await?;

        let start: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await?;
        let mut version = start;

        while let Some(step) = self.steps.get(&version) {
            info!("[Migrator] 升级数据库: {} -> {}", version, version + 1);
            if let Err(e) = Self::apply_step(&mut *tx, step.as_ref(), version).await {
                error!("[Migrator] 数据库迁移失败，回滚全部步骤: {}", e);
                tx.rollback().await?;
                return Err(SyncError::Migration {
                    version,
                    source: Box::new(e),
                });
            }
            version += 1;
        }

        tx.commit().await?;

        if version == start {
            debug!("[Migrator] 数据库已是最新版本: {}", version);
        } else {
            info!("[Migrator] ✅ 数据库迁移完成: {} -> {}", start, version);
        }
        Ok(version)
    }

    async fn apply_step(
        conn: &mut SqliteConnection,
        step: &dyn Migration,
        from_version: i64,
    ) -> Result<()> {
        step.apply(&mut *conn).await?;
        // PRAGMA 不支持参数绑定，版本号是整数，直接拼接
        sqlx::query(&format!("PRAGMA user_version = {}", from_version + 1))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
