//! 同步层错误类型
//!
//! 对应四类错误：未初始化访问、参数校验、本地存储 I/O、远端 I/O（含响应解析），
//! 另有编排层的阶段注解（`Phase`）用于给底层错误加上上下文。

use thiserror::Error;

/// 同步层统一的 Result 别名
pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步层错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 在初始化之前访问缓存或同步引擎（调用方编程错误）
    #[error("未初始化: {0}")]
    NotInitialized(&'static str),

    /// 参数校验失败（在任何 I/O 之前拒绝）
    #[error("参数无效: {0}")]
    Validation(String),

    /// 本地 SQLite 读写或事务失败
    #[error("本地存储错误: {0}")]
    Storage(#[from] sqlx::Error),

    /// 某个迁移步骤失败，整个迁移事务已回滚
    #[error("数据库迁移失败（版本 {version}）: {source}")]
    Migration {
        version: i64,
        #[source]
        source: Box<SyncError>,
    },

    /// 网络层失败（连接、超时）
    #[error("{operation}请求失败: {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// 服务端返回非 2xx
    #[error("{operation}服务器错误 ({status}): {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// 2xx 响应体无法解析为预期结构
    #[error("{operation}响应解析失败: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// 编排层对底层错误的阶段注解
    #[error("{phase}: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<SyncError>,
    },

    /// 生命周期状态不允许该操作
    #[error("状态错误: {0}")]
    InvalidState(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn http(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Http { operation, source }
    }

    pub fn api(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            status,
            message: message.into(),
        }
    }

    pub fn decode(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Decode { operation, source }
    }

    /// 给错误加上编排阶段的上下文
    pub fn in_phase(self, phase: &'static str) -> Self {
        Self::Phase {
            phase,
            source: Box::new(self),
        }
    }

    /// 去掉阶段注解后的根错误
    pub fn root(&self) -> &SyncError {
        match self {
            Self::Phase { source, .. } => source.root(),
            Self::Migration { source, .. } => source.root(),
            other => other,
        }
    }

    /// 是否为远端（网络 / 服务端）错误
    pub fn is_remote(&self) -> bool {
        matches!(
            self.root(),
            Self::Http { .. } | Self::Api { .. } | Self::Decode { .. }
        )
    }

    /// 是否为本地存储错误
    pub fn is_storage(&self) -> bool {
        matches!(self.root(), Self::Storage(_))
    }
}

/// 给 `Result` 附加阶段注解，用法类似 anyhow 的 `context`
pub trait PhaseExt<T> {
    fn phase(self, phase: &'static str) -> Result<T>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn phase(self, phase: &'static str) -> Result<T> {
        self.map_err(|e| e.in_phase(phase))
    }
}
