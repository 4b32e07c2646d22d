//! 认证错误

use axum::http::StatusCode;

use crate::error::FrameworkError;

/// 认证失败原因
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// 用户不存在或密码错误（两者对外不区分）
    #[error("Invalid credentials.")]
    BadCredentials,
    #[error("Missing credentials.")]
    MissingCredentials,
    #[error("Too many failed login attempts, please try again later.")]
    TooManyAttempts,
    #[error("Invalid CSRF token.")]
    InvalidCsrf,
    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),
    #[error("OAuth authentication failed: {0}")]
    OAuth(String),
    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::UnsupportedRequest(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<AuthError> for FrameworkError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal(inner) => FrameworkError::Internal(inner),
            AuthError::UnsupportedRequest(ct) => FrameworkError::UnsupportedMediaType(ct),
            other => FrameworkError::Unauthorized(other.to_string()),
        }
    }
}

impl From<crate::orm::OrmError> for AuthError {
    fn from(e: crate::orm::OrmError) -> Self {
        Self::Internal(e.into())
    }
}
