//! 当前用户提取器

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::passport::AuthenticatedUser;
use crate::error::FrameworkError;

/// 已认证用户（未登录返回 401）
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

/// 可选的已认证用户
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<AuthenticatedUser>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = FrameworkError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| FrameworkError::Unauthorized("Authentication required.".to_string()))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for OptionalUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}
