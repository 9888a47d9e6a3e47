//! 远端 HTTP 响应的通用处理

use crate::sync::error::{Result, SyncError};
use serde::Deserialize;
use tracing::{debug, error};

/// 服务端错误响应体：`{ "error": "..." }`
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// 从失败响应中提取错误信息，优先使用 `error` 字段，否则用原始 body
fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(ErrorBody { error: Some(msg) }) => msg,
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// 检查状态码并读取 body（只能读取一次）
async fn read_body(response: reqwest::Response, operation: &'static str) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| SyncError::http(operation, e))?;

    if !status.is_success() {
        let message = error_message(&body);
        error!(
            "[HTTP] {}请求失败，HTTP状态: {}, 响应: {}",
            operation, status, message
        );
        return Err(SyncError::api(operation, status.as_u16(), message));
    }
    debug!("[HTTP] {}请求成功，HTTP状态: {}", operation, status);
    Ok(body.to_vec())
}

/// 通用 HTTP 响应处理：校验状态码后反序列化为 `T`
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<T> {
    let body = read_body(response, operation).await?;
    serde_json::from_slice(&body).map_err(|e| {
        error!(
            "[HTTP] {}反序列化失败: {:?}\n原始响应: {}",
            operation,
            e,
            String::from_utf8_lossy(&body)
        );
        SyncError::decode(operation, e)
    })
}

/// 只关心成功与否的请求（写操作）
pub async fn ensure_success(response: reqwest::Response, operation: &'static str) -> Result<()> {
    read_body(response, operation).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_error_field() {
        assert_eq!(error_message(br#"{"error":"chat not found"}"#), "chat not found");
        assert_eq!(error_message(b"Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(br#"{"detail":"x"}"#), r#"{"detail":"x"}"#);
    }
}
