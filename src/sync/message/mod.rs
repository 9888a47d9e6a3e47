//! 消息模块

pub mod api;
pub mod dao;
pub mod models;

pub use api::MessageApi;
pub use dao::MessageDao;
pub use models::{Message, Role};
