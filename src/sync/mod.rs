//! 聊天缓存双向同步
//!
//! - 本地缓存：SQLite 中的会话/消息表，带软删除与同步标记
//! - 远端存储：分页拉取与推送的 HTTP 接口
//! - 同步引擎：登录全量拉取、周期增量对账、登出前刷写

pub mod cache;
pub mod chat;
pub mod db;
pub mod error;
pub mod listener;
pub mod message;
pub mod migration;
pub mod models;
pub mod pagination;
pub mod remote;
pub mod scheduler;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::CacheStore;
pub use chat::{Chat, ChatSummary, TimestampedTable};
pub use error::{Result, SyncError};
pub use listener::{EmptySyncListener, SyncListener};
pub use message::{Message, Role};
pub use migration::{Migration, Migrator, SqlMigration};
pub use models::{LoginConfig, LogoutConfig, SyncReport, SyncState};
pub use pagination::{PageRequest, Paginated, PaginationInfo};
pub use remote::{HttpRemoteStore, RemoteQuery, RemoteStore};
pub use service::SyncEngine;

/// 当前时间（Unix 毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
