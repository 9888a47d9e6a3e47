//! 同步引擎配置与状态定义

use crate::sync::error::{Result, SyncError};
use crate::sync::migration::Migration;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 默认同步间隔（秒）
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
/// 同步间隔上限（秒），7 天
pub const MAX_SYNC_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: i64 = 200;

/// 登录配置
pub struct LoginConfig {
    /// 后端地址
    pub backend_url: String,
    /// 本地缓存使用的连接池
    pub db: SqlitePool,
    /// 用户 ID
    pub user_id: String,
    /// 周期同步间隔（秒）
    pub sync_interval_secs: u64,
    /// 拉取/推送的分页大小
    pub page_size: i64,
    /// 拉取远端时是否排除已删除的会话
    pub exclude_deleted: bool,
    /// 额外的迁移步骤：(起始版本, 步骤)
    pub migrations: Vec<(i64, Arc<dyn Migration>)>,
    /// Bearer 凭证
    pub credential: Option<String>,
}

impl LoginConfig {
    pub fn new(backend_url: impl Into<String>, db: SqlitePool, user_id: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            db,
            user_id: user_id.into(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            exclude_deleted: true,
            migrations: Vec::new(),
            credential: None,
        }
    }

    pub fn with_sync_interval_secs(mut self, secs: u64) -> Self {
        self.sync_interval_secs = secs;
        self
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_exclude_deleted(mut self, exclude_deleted: bool) -> Self {
        self.exclude_deleted = exclude_deleted;
        self
    }

    pub fn with_migration(mut self, from_version: i64, step: impl Migration + 'static) -> Self {
        self.migrations.push((from_version, Arc::new(step)));
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// 校验配置，在任何 I/O 之前调用
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(SyncError::validation("user_id 不能为空"));
        }
        if self.page_size <= 0 {
            return Err(SyncError::validation(format!(
                "page_size 必须为正数，当前: {}",
                self.page_size
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::validation("sync_interval_secs 必须大于 0"));
        }
        if self.sync_interval_secs > MAX_SYNC_INTERVAL_SECS {
            return Err(SyncError::validation(format!(
                "sync_interval_secs 不能超过 {}，当前: {}",
                MAX_SYNC_INTERVAL_SECS, self.sync_interval_secs
            )));
        }
        Ok(())
    }

    pub(crate) fn settings(&self) -> SyncSettings {
        SyncSettings {
            user_id: self.user_id.clone(),
            page_size: self.page_size,
            exclude_deleted: self.exclude_deleted,
            interval: Duration::from_secs(self.sync_interval_secs),
        }
    }
}

impl fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginConfig")
            .field("backend_url", &self.backend_url)
            .field("user_id", &self.user_id)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("page_size", &self.page_size)
            .field("exclude_deleted", &self.exclude_deleted)
            .field("migrations", &self.migrations.len())
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .finish()
    }
}

/// 登出配置
#[derive(Debug, Clone, Copy)]
pub struct LogoutConfig {
    /// 最终推送时的分页大小
    pub page_size: i64,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// 登录后固定下来的同步参数
#[derive(Debug, Clone)]
pub(crate) struct SyncSettings {
    pub user_id: String,
    pub page_size: i64,
    pub exclude_deleted: bool,
    pub interval: Duration,
}

/// 同步引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Uninitialized,
    Initializing,
    Active,
    Stopped,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Initializing => "Initializing",
            Self::Active => "Active",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// 一轮同步的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub chats_pulled: usize,
    pub chats_pushed: usize,
    pub messages_pulled: usize,
    pub messages_pushed: usize,
    pub chats_purged: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db::create_sqlite_pool;

    #[tokio::test]
    async fn login_config_defaults_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_sqlite_pool(dir.path().join("cfg.db").to_str().unwrap(), 1)
            .await
            .unwrap();

        let config = LoginConfig::new("http://localhost:3000", pool.clone(), "u1");
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.page_size, 200);
        assert!(config.exclude_deleted);
        assert!(config.credential.is_none());
        config.validate().unwrap();

        let bad = LoginConfig::new("http://localhost:3000", pool.clone(), "u1").with_page_size(0);
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        let bad = LoginConfig::new("http://localhost:3000", pool.clone(), " ");
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        let bad =
            LoginConfig::new("http://localhost:3000", pool.clone(), "u1").with_sync_interval_secs(0);
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        let bad = LoginConfig::new("http://localhost:3000", pool.clone(), "u1")
            .with_sync_interval_secs(u64::MAX);
        assert!(matches!(bad.validate(), Err(SyncError::Validation(_))));

        let longest = LoginConfig::new("http://localhost:3000", pool, "u1")
            .with_sync_interval_secs(MAX_SYNC_INTERVAL_SECS);
        assert!(longest.validate().is_ok());
    }

    #[tokio::test]
    async fn debug_output_hides_credential() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_sqlite_pool(dir.path().join("cfg.db").to_str().unwrap(), 1)
            .await
            .unwrap();
        let config = LoginConfig::new("http://localhost:3000", pool, "u1").with_credential("secret");
        let output = format!("{:?}", config);
        assert!(!output.contains("secret"));
        assert!(output.contains("***"));
    }
}
