//! Wire envelope for the RPC channel: request/response/notification shapes and
//! the normalized error taxonomy carried in every error response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, ErrorCode};

/// A request `id`: either a string or a number, matching whatever the client sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

/// A client→server request. No `id` means it is a notification and the engine
/// does not send a response (clients are not expected to send these, but the
/// frame-level parser does not reject them).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub version: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        let data = err.reason().map(|reason| serde_json::json!({ "reason": reason }));
        Self {
            code: err.code(),
            message: err.to_string(),
            data,
        }
    }
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

/// A server→client response, carrying exactly one of `result`/`error`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub version: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self { version: "2.0", id, result: Some(result), error: None }
    }

    pub fn err(id: RequestId, error: RpcError) -> Self {
        Self { version: "2.0", id, result: None, error: Some(error) }
    }
}

/// A frame-level parse failure has no request to key a response to, so this
/// carries a null id.
#[derive(Debug, Clone, Serialize)]
pub struct RpcParseErrorResponse {
    pub version: &'static str,
    pub id: (),
    pub error: RpcError,
}

impl RpcParseErrorResponse {
    pub fn new(error: RpcError) -> Self {
        Self { version: "2.0", id: (), error }
    }
}

/// A server→client notification (events, heartbeat pings).
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
    pub version: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl RpcNotification {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self { version: "2.0", method, params }
    }
}
