//! OAuth2 授权码登录
//!
//! `start_path` 跳转到授权页，`callback_path` 校验 state、换取 access token
//! 并读取 userinfo 构造 Passport

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    http::{Method, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{AuthRequest, Authenticator, TARGET_PATH_KEY};
use crate::common::auth::constant_time_eq;
use crate::error::FrameworkError;
use crate::model::config::OAuthConfig;
use crate::security::error::AuthError;
use crate::security::passport::{AuthenticatedUser, Credentials, Passport};

/// 会话键：授权请求的 state
pub const OAUTH_STATE_KEY: &str = "_security.oauth_state";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct OAuthAuthenticator {
    config: OAuthConfig,
    client: reqwest::Client,
}

impl OAuthAuthenticator {
    pub fn new(config: OAuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("创建 OAuth HTTP 客户端失败")?;
        Ok(Self { config, client })
    }

    /// 授权页地址
    pub fn authorize_url(&self, state: &str) -> String {
        let separator = if self.config.authorize_url.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&state={}",
            self.config.authorize_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(state),
        );
        if !self.config.scopes.is_empty() {
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&self.config.scopes.join(" ")));
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AuthError> {
        let body = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

        let response = self
            .client
            .post(&self.config.token_url)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::OAuth(format!("token request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::OAuth(format!(
                "token endpoint returned HTTP {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::OAuth(format!("invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<Value, AuthError> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::OAuth(format!("userinfo request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AuthError::OAuth(format!(
                "userinfo endpoint returned HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::OAuth(format!("invalid userinfo response: {}", e)))
    }
}

fn identifier_of(info: &Value, field: &str) -> Option<String> {
    match info.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    fn name(&self) -> &str {
        "oauth"
    }

    fn supports(&self, parts: &Parts) -> bool {
        let path = parts.uri.path();
        parts.method == Method::GET
            && (path == self.config.start_path || path == self.config.callback_path)
    }

    async fn intercept(&self, request: &AuthRequest) -> Option<Response> {
        if request.path() != self.config.start_path {
            return None;
        }
        let state = Uuid::new_v4().simple().to_string();
        if let Err(e) = request.session.insert(OAUTH_STATE_KEY, &state) {
            return Some(FrameworkError::Internal(e.into()).into_response());
        }
        Some(Redirect::to(&self.authorize_url(&state)).into_response())
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Passport, AuthError> {
        if let Some(error) = request.query_value("error") {
            return Err(AuthError::OAuth(error));
        }

        let expected = request.session.take::<String>(OAUTH_STATE_KEY);
        let state = request.query_value("state");
        match (expected, state) {
            (Some(expected), Some(state)) if constant_time_eq(&expected, &state) => {}
            _ => return Err(AuthError::OAuth("invalid state".to_string())),
        }

        let code = request
            .query_value("code")
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCredentials)?;
        let access_token = self.exchange_code(&code).await?;
        let info = self.fetch_user_info(&access_token).await?;
        let identifier = identifier_of(&info, &self.config.identifier_field).ok_or_else(|| {
            AuthError::OAuth(format!(
                "userinfo has no '{}' field",
                self.config.identifier_field
            ))
        })?;

        tracing::info!(user = %identifier, "OAuth 登录成功");
        Ok(Passport::new(identifier, Credentials::Token)
            .with_roles(self.config.default_roles.clone())
            .with_attribute("oauth", info))
    }

    async fn on_success(&self, _user: &AuthenticatedUser, request: &AuthRequest) -> Option<Response> {
        let target = request
            .session
            .take::<String>(TARGET_PATH_KEY)
            .unwrap_or_else(|| self.config.default_target_path.clone());
        Some(Redirect::to(&target).into_response())
    }

    async fn on_failure(&self, error: &AuthError, _request: &AuthRequest) -> Response {
        tracing::warn!("OAuth 登录失败: {}", error);
        FrameworkError::Unauthorized(error.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        body::Body,
        http::{HeaderMap, Request, StatusCode},
        routing::{get, post},
    };

    use super::*;
    use crate::security::authenticator::testing::auth_request;
    use crate::security::session::Session;

    async fn mock_provider() -> String {
        let app = Router::new()
            .route(
                "/token",
                post(|body: String| async move {
                    if body.contains("code=good-code") && body.contains("client_secret=shh") {
                        Json(serde_json::json!({ "access_token": "tok-1", "token_type": "bearer" }))
                            .into_response()
                    } else {
                        StatusCode::BAD_REQUEST.into_response()
                    }
                }),
            )
            .route(
                "/userinfo",
                get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer tok-1") => Json(serde_json::json!({ "id": 7, "email": "fox@example.com" }))
                            .into_response(),
                        _ => StatusCode::UNAUTHORIZED.into_response(),
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base: &str) -> OAuthConfig {
        OAuthConfig {
            client_id: "client".into(),
            client_secret: "shh".into(),
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/userinfo", base),
            redirect_uri: "http://app.test/connect/oauth/check".into(),
            scopes: vec!["openid".into(), "email".into()],
            start_path: "/connect/oauth".into(),
            callback_path: "/connect/oauth/check".into(),
            identifier_field: "email".into(),
            default_target_path: "/".into(),
            default_roles: vec!["ROLE_USER".into()],
        }
    }

    fn get_request(uri: &str, session: Session) -> AuthRequest {
        auth_request(Request::get(uri).body(Body::empty()).unwrap(), "", session)
    }

    #[tokio::test]
    async fn test_full_flow() {
        let base = mock_provider().await;
        let auth = OAuthAuthenticator::new(config(&base)).unwrap();
        let session = Session::detached();

        let start = get_request("/connect/oauth", session.clone());
        assert!(auth.supports(&start.parts));
        let response = auth.intercept(&start).await.unwrap();
        let location = response.headers()["location"].to_str().unwrap().to_string();
        let state = session.get::<String>(OAUTH_STATE_KEY).unwrap();
        assert!(location.starts_with(&format!("{}/authorize?response_type=code&client_id=client", base)));
        assert!(location.contains(&format!("state={}", state)));
        assert!(location.contains("scope=openid%20email"));

        let callback = get_request(
            &format!("/connect/oauth/check?code=good-code&state={}", state),
            session.clone(),
        );
        assert!(auth.intercept(&callback).await.is_none());
        let passport = auth.authenticate(&callback).await.unwrap();
        assert_eq!(passport.user_badge, "fox@example.com");
        assert_eq!(passport.roles, vec!["ROLE_USER"]);
        assert_eq!(passport.attributes["oauth"]["id"], 7);
        assert!(!session.contains(OAUTH_STATE_KEY));
    }

    #[tokio::test]
    async fn test_state_mismatch_and_bad_code() {
        let base = mock_provider().await;
        let auth = OAuthAuthenticator::new(config(&base)).unwrap();
        let session = Session::detached();
        session.insert(OAUTH_STATE_KEY, "expected").unwrap();

        let forged = get_request("/connect/oauth/check?code=good-code&state=forged", session.clone());
        assert!(matches!(auth.authenticate(&forged).await, Err(AuthError::OAuth(_))));

        session.insert(OAUTH_STATE_KEY, "expected").unwrap();
        let bad_code = get_request("/connect/oauth/check?code=bad&state=expected", session.clone());
        let error = auth.authenticate(&bad_code).await.unwrap_err();
        assert!(error.to_string().contains("HTTP 400"));

        let response = auth.on_failure(&error, &bad_code).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_identifier_of() {
        let info = serde_json::json!({ "id": 42, "login": "" });
        assert_eq!(identifier_of(&info, "id").as_deref(), Some("42"));
        assert_eq!(identifier_of(&info, "login"), None);
        assert_eq!(identifier_of(&info, "missing"), None);
    }
}
