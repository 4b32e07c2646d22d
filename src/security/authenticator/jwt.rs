//! Bearer Token 认证

use async_trait::async_trait;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};

use super::{AuthRequest, Authenticator};
use crate::common::auth::extract_bearer;
use crate::error::ErrorResponse;
use crate::security::error::AuthError;
use crate::security::jwt::JwtManager;
use crate::security::passport::{AuthenticatedUser, Credentials, Passport};

pub struct JwtAuthenticator {
    jwt: JwtManager,
}

impl JwtAuthenticator {
    pub fn new(jwt: JwtManager) -> Self {
        Self { jwt }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &str {
        "jwt"
    }

    fn supports(&self, parts: &Parts) -> bool {
        extract_bearer(&parts.headers).is_some()
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Passport, AuthError> {
        let token = extract_bearer(&request.parts.headers).ok_or(AuthError::MissingCredentials)?;
        let claims = self.jwt.verify(&token)?;
        Ok(Passport::new(claims.sub, Credentials::Token).with_roles(claims.roles))
    }

    async fn on_success(&self, _user: &AuthenticatedUser, _request: &AuthRequest) -> Option<Response> {
        None
    }

    async fn on_failure(&self, error: &AuthError, _request: &AuthRequest) -> Response {
        let body = ErrorResponse::new("authentication_error", error.to_string());
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer error=\"invalid_token\""),
        );
        response
    }
}
