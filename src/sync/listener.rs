//! 同步监听器回调接口

use crate::sync::models::SyncReport;
use async_trait::async_trait;

/// 同步过程回调；每一轮对账（后台周期或 `sync_now`）都会触发
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 一轮同步开始
    async fn on_sync_server_start(&self);

    /// 一轮同步完成
    async fn on_sync_server_finish(&self, report: SyncReport);

    /// 一轮同步失败（游标未推进，下一轮会重试）
    async fn on_sync_server_failed(&self, error: String);
}

/// 空实现（默认监听器）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_server_start(&self) {}
    async fn on_sync_server_finish(&self, _report: SyncReport) {}
    async fn on_sync_server_failed(&self, _error: String) {}
}
