//! 会话模块
//!
//! 会话的本地存储（DAO）与远端接口（API）

pub mod api;
pub mod dao;
pub mod models;

pub use api::ChatApi;
pub use dao::ChatDao;
pub use models::{Chat, ChatSummary, TimestampedTable};
