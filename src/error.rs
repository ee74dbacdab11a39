//! 统一的 API 错误类型：所有失败都以 `{success: false, message}` 返回。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::io::ErrorKind;
use tracing::{error, warn};

use crate::config::ADMIN_REALM;
use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::upload::UploadError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized,
    Conflict(String),
    RangeNotSatisfiable(u64),
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => msg,
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                msg
            }
            ApiError::RangeNotSatisfiable(size) => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
                "range not satisfiable".to_string()
            }
            ApiError::Unauthorized => {
                if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{ADMIN_REALM}\""))
                {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
                "authentication required".to_string()
            }
        };
        (
            status,
            headers,
            Json(ErrorBody {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName => {
                warn!("rejected file name outside projects directory");
                ApiError::BadRequest("invalid file name".into())
            }
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("file not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(error: UploadError) -> Self {
        match error {
            UploadError::AlreadyExists(name) => {
                ApiError::Conflict(format!("a submission named {name} already exists"))
            }
            UploadError::Io(err) => ApiError::Internal(err.to_string()),
            UploadError::Registry(err) => err.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}
