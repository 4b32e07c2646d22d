//! 认证器
//!
//! 防火墙依次询问认证器是否支持当前请求，第一个支持的认证器负责认证；
//! 成功时产出 [`Passport`]，由防火墙转换为 [`AuthenticatedUser`]。

mod form_login;
mod jwt;
mod oauth;

pub use form_login::FormLoginAuthenticator;
pub use jwt::JwtAuthenticator;
pub use oauth::OAuthAuthenticator;

use async_trait::async_trait;
use axum::{body::Bytes, http::request::Parts, response::Response};

use super::error::AuthError;
use super::passport::{AuthenticatedUser, Passport};
use super::session::Session;
use crate::common::parse_urlencoded;

/// 会话键：登录前访问的地址
pub const TARGET_PATH_KEY: &str = "_security.target_path";
/// 会话键：最近一次提交的用户名（登录页回填）
pub const LAST_USERNAME_KEY: &str = "_security.last_username";
/// 闪存消息类型：认证错误
pub const AUTH_ERROR_FLASH: &str = "error";

/// 交给认证器的请求（需要时已读取请求体）
pub struct AuthRequest {
    pub parts: Parts,
    pub body: Bytes,
    pub session: Session,
    pub ip: String,
    pub firewall: String,
}

impl AuthRequest {
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_value(&self, name: &str) -> Option<String> {
        let query = self.parts.uri.query()?;
        parse_urlencoded(query)
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// 解析 urlencoded 请求体
    pub fn form(&self) -> Vec<(String, String)> {
        parse_urlencoded(&String::from_utf8_lossy(&self.body))
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, parts: &Parts) -> bool;

    /// 认证前需要读取请求体
    fn needs_body(&self) -> bool {
        false
    }

    /// 在认证之前直接响应（如跳转到第三方授权页）
    async fn intercept(&self, _request: &AuthRequest) -> Option<Response> {
        None
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Passport, AuthError>;

    /// 返回 `None` 表示继续交给控制器处理
    async fn on_success(&self, user: &AuthenticatedUser, request: &AuthRequest) -> Option<Response>;

    async fn on_failure(&self, error: &AuthError, request: &AuthRequest) -> Response;
}
