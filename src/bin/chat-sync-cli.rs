//! 聊天缓存同步 CLI
//!
//! 非交互式：登录后按周期与后端同步本地缓存，运行指定时长（或直到 Ctrl+C）后登出

use anyhow::{Context, Result};
use chat_cache_sync::{
    create_sqlite_pool, LoginConfig, LogoutConfig, SyncEngine, SyncListener, SyncReport,
};
use clap::Parser;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// 聊天缓存同步 CLI
#[derive(Parser, Debug)]
#[command(name = "chat-sync-cli")]
#[command(about = "聊天缓存同步 CLI - 本地 SQLite 缓存与后端双向同步", long_about = None)]
struct Args {
    /// 后端地址
    #[arg(long, default_value = "http://localhost:3000")]
    backend_url: String,

    /// 本地 SQLite 数据库（路径或 sqlite:// URL）
    #[arg(long, default_value = "chat_cache.db")]
    db: String,

    /// 用户 ID
    #[arg(short, long)]
    user_id: String,

    /// Bearer token
    #[arg(long, env = "CHAT_SYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// 同步间隔（秒）
    #[arg(short, long, default_value = "60")]
    interval: u64,

    /// 分页大小
    #[arg(long, default_value = "200")]
    page_size: i64,

    /// 登录时同时拉取已删除的会话
    #[arg(long)]
    include_deleted: bool,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,chat_cache_sync=debug）
    #[arg(long, default_value = "info,chat_cache_sync=debug")]
    log_level: String,

    /// 额外写入的日志文件
    #[arg(long)]
    log_file: Option<String>,
}

/// 初始化日志（stdout，可选同时写入文件）
fn init_logger(log_level: &str, log_file: Option<&str>) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法创建日志文件 {}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file {
        info!("[CLI] 📝 日志已同时输出到控制台和文件: {}", path);
    }
    Ok(())
}

/// 把同步事件打印到日志
struct CliSyncListener;

#[async_trait::async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_server_start(&self) {
        info!("[CLI/Sync] 🔄 同步开始");
    }

    async fn on_sync_server_finish(&self, report: SyncReport) {
        info!(
            "[CLI/Sync] ✅ 同步完成: {}",
            serde_json::to_string(&report).unwrap_or_default()
        );
    }

    async fn on_sync_server_failed(&self, error: String) {
        error!("[CLI/Sync] ❌ 同步失败: {}", error);
    }
}

async fn wait_for_exit(duration: u64) {
    if duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动登出", duration);
        tokio::select! {
            _ = sleep(Duration::from_secs(duration)) => {}
            _ = tokio::signal::ctrl_c() => info!("[CLI] 收到 Ctrl+C"),
        }
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 登出并退出");
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[CLI] 监听 Ctrl+C 失败: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level, args.log_file.as_deref())?;

    info!("[CLI] 🚀 聊天缓存同步 CLI");
    info!("[CLI] 👤 用户ID: {}", args.user_id);
    info!("[CLI] 🌐 后端: {}", args.backend_url);
    info!("[CLI] 💾 本地缓存: {}", args.db);

    let pool = create_sqlite_pool(&args.db, 5)
        .await
        .with_context(|| format!("打开本地缓存失败: {}", args.db))?;

    let mut config = LoginConfig::new(args.backend_url.clone(), pool, args.user_id.clone())
        .with_sync_interval_secs(args.interval)
        .with_page_size(args.page_size)
        .with_exclude_deleted(!args.include_deleted);
    if let Some(token) = args.token {
        config = config.with_credential(token);
    }

    let engine = SyncEngine::with_listener(Arc::new(CliSyncListener));

    info!("[CLI] 🔐 正在登录并拉取远端数据...");
    engine.login(config).await.context("登录失败")?;

    let cache = engine.cache().await?;
    let chats = cache.get_chats().await?;
    info!("[CLI] 📋 会话列表（共 {} 个）:", chats.len());
    for summary in chats.iter().take(5) {
        info!(
            "[CLI]   - {} | {} | 消息: {}",
            summary.chat.chat_id, summary.chat.title, summary.message_count
        );
    }

    wait_for_exit(args.duration).await;

    info!("[CLI] 📤 正在登出并推送本地数据...");
    engine
        .logout(LogoutConfig {
            page_size: args.page_size,
        })
        .await
        .context("登出失败")?;
    info!("[CLI] 👋 程序退出");

    Ok(())
}
