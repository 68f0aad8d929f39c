use axum::{http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;

/// Normalized RPC error codes carried in every protocol error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    Internal,
    AuthRequired,
    AuthFailed,
    PermissionDenied,
    NotFound,
    InvalidState,
    RateLimited,
    DependencyFailed,
    Unsupported,
}

/// Application-wide error type.
///
/// Every variant carries an implicit [`ErrorCode`] via [`AppError::code`], so the
/// RPC layer's error envelope can never drift from the Rust-level error taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("rate limited")]
    RateLimited,

    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The normalized error code exposed to RPC clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::InvalidParams(_) => ErrorCode::InvalidParams,
            AppError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            AppError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            AppError::AuthRequired => ErrorCode::AuthRequired,
            AppError::AuthFailed(_) => ErrorCode::AuthFailed,
            AppError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            AppError::InvalidState(_) => ErrorCode::InvalidState,
            AppError::RateLimited => ErrorCode::RateLimited,
            AppError::DependencyFailed(_) => ErrorCode::DependencyFailed,
            AppError::Unsupported(_) => ErrorCode::Unsupported,
            AppError::Config(_) | AppError::Io(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// A short machine-stable reason, used as `error.data.reason` for state conflicts
    /// (e.g. `"ALREADY_RECORDING"`, `"NO_ACTIVE_SESSION"`).
    pub fn reason(&self) -> Option<&str> {
        match self {
            AppError::InvalidState(reason) => Some(reason),
            _ => None,
        }
    }
}

/// HTTP status mapping used only by the plain file-serving surface (`/files/...`).
/// The RPC transport never uses HTTP status codes for application errors; see
/// [`crate::rpc::protocol::RpcError`] for that path.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidParams(_) | AppError::InvalidRequest(_) | AppError::Unsupported(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::DependencyFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(error = %self, code = ?self.code(), "request failed");
        (status, self.to_string()).into_response()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
