//! SQLite 数据库工具：统一创建连接池
//!
//! schema 不通过 `sqlx::migrate!()` 管理，而是由 [`crate::sync::migration::Migrator`]
//! 在缓存初始化时按 `PRAGMA user_version` 逐步升级。

use crate::sync::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;

/// 把数据库路径规范化为 sqlx 可识别的 URL：
/// - 相对路径：如 "chats.db" 会转换为 "sqlite://chats.db"
/// - 绝对路径：如 "/path/to/db.db" 会转换为 "sqlite:///path/to/db.db"
/// - 完整URL：如 "sqlite://chats.db" 直接使用
pub fn normalize_db_url(db_path: &str) -> String {
    if db_path.starts_with("sqlite:") {
        db_path.to_string()
    } else {
        format!("sqlite://{}", db_path)
    }
}

/// 创建 SQLite 连接池（WAL 模式，开启外键约束，文件不存在时自动创建）
pub async fn create_sqlite_pool(db_path: &str, max_connections: u32) -> Result<Pool<Sqlite>> {
    let db_url = normalize_db_url(db_path);
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    info!("[DB] SQLite 连接池已创建: {}", db_url);
    Ok(pool)
}
