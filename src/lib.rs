pub mod sync;

// 重新导出常用类型，方便外部使用
pub use sync::{
    db::create_sqlite_pool, CacheStore, Chat, ChatSummary, EmptySyncListener, LoginConfig,
    LogoutConfig, Message, Role, SyncEngine, SyncError, SyncListener, SyncReport, SyncState,
};
