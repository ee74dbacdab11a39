//! 管理端路由的 Basic 认证。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::Request;
use axum::middleware;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Basic};
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// 管理端访问策略；`credentials` 为 `None` 时管理路由不设防。
#[derive(Debug)]
pub struct AdminAuth {
    pub credentials: Option<AdminCredentials>,
}

impl AdminAuth {
    /// 仅当用户名与密码都配置时才启用认证。
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Self {
        let credentials = match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(AdminCredentials { username, password })
            }
            _ => None,
        };
        Self { credentials }
    }

    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    fn accepts(&self, username: &str, password: &str) -> bool {
        match &self.credentials {
            Some(expected) => expected.username == username && expected.password == password,
            None => true,
        }
    }
}

/// 认证中间件：校验 Basic 认证头。
pub async fn admin_guard(
    Extension(auth): Extension<Arc<AdminAuth>>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    if !auth.is_enabled() {
        return Ok(next.run(req).await);
    }

    if let Some(TypedHeader(auth_header)) = auth_header
        && auth.accepts(auth_header.username(), auth_header.password())
    {
        return Ok(next.run(req).await);
    }

    warn!(path = req.uri().path(), "admin request rejected");
    Err(ApiError::Unauthorized)
}
