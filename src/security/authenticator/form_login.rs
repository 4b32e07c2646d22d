//! 表单登录

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{Method, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};

use super::{AUTH_ERROR_FLASH, AuthRequest, Authenticator, LAST_USERNAME_KEY, TARGET_PATH_KEY};
use crate::form::{CSRF_FIELD, is_form_content_type};
use crate::model::config::FormLoginConfig;
use crate::security::csrf::verify_csrf;
use crate::security::error::AuthError;
use crate::security::passport::{AuthenticatedUser, Credentials, Passport};
use crate::security::password::PasswordHasher;
use crate::security::throttle::LoginThrottle;
use crate::security::user::UserProvider;

pub struct FormLoginAuthenticator {
    config: FormLoginConfig,
    provider: Arc<dyn UserProvider>,
    hasher: PasswordHasher,
    throttle: Arc<LoginThrottle>,
}

impl FormLoginAuthenticator {
    pub fn new(
        config: FormLoginConfig,
        provider: Arc<dyn UserProvider>,
        hasher: PasswordHasher,
        throttle: Arc<LoginThrottle>,
    ) -> Self {
        Self {
            config,
            provider,
            hasher,
            throttle,
        }
    }

    pub fn login_path(&self) -> &str {
        &self.config.login_path
    }
}

#[async_trait]
impl Authenticator for FormLoginAuthenticator {
    fn name(&self) -> &str {
        "form_login"
    }

    fn supports(&self, parts: &Parts) -> bool {
        parts.method == Method::POST && parts.uri.path() == self.config.login_path
    }

    fn needs_body(&self) -> bool {
        true
    }

    async fn authenticate(&self, request: &AuthRequest) -> Result<Passport, AuthError> {
        let content_type = request.header(header::CONTENT_TYPE.as_str());
        if !is_form_content_type(content_type) {
            return Err(AuthError::UnsupportedRequest(
                content_type.unwrap_or("missing content type").to_string(),
            ));
        }

        let form = request.form();
        let value = |name: &str| {
            form.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        };

        if !verify_csrf(&request.session, Some(value(CSRF_FIELD))) {
            return Err(AuthError::InvalidCsrf);
        }

        let username = value(&self.config.username_parameter).trim();
        let password = value(&self.config.password_parameter);
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if let Err(e) = request.session.insert(LAST_USERNAME_KEY, username) {
            tracing::warn!("保存用户名失败: {}", e);
        }

        if !self.throttle.check(&request.ip, username) {
            tracing::warn!(ip = %request.ip, username, "登录尝试次数过多");
            return Err(AuthError::TooManyAttempts);
        }

        // 用户不存在时同样执行一次 bcrypt 校验
        let user = self.provider.load_user(username).await?;
        let hash = user.as_ref().and_then(|u| u.password_hash.as_deref());
        let matched = self.hasher.verify_async(password, hash).await;
        let user = match user {
            Some(user) if matched => user,
            _ => return Err(AuthError::BadCredentials),
        };

        self.throttle.reset(&request.ip, username);
        Ok(Passport::new(user.identifier, Credentials::Password).with_roles(user.roles))
    }

    async fn on_success(&self, _user: &AuthenticatedUser, request: &AuthRequest) -> Option<Response> {
        request.session.remove(LAST_USERNAME_KEY);
        let target = request
            .session
            .take::<String>(TARGET_PATH_KEY)
            .unwrap_or_else(|| self.config.default_target_path.clone());
        Some(Redirect::to(&target).into_response())
    }

    async fn on_failure(&self, error: &AuthError, request: &AuthRequest) -> Response {
        request.session.flash(AUTH_ERROR_FLASH, error.to_string());
        Redirect::to(&self.config.login_path).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::{body::Body, http::Request};

    use super::*;
    use crate::model::config::MemoryUserConfig;
    use crate::security::authenticator::testing::auth_request;
    use crate::security::csrf::csrf_token;
    use crate::security::session::Session;
    use crate::security::user::MemoryUserProvider;

    fn authenticator() -> FormLoginAuthenticator {
        let hasher = PasswordHasher::with_cost(4);
        let users = BTreeMap::from([(
            "fox".to_string(),
            MemoryUserConfig {
                password: hasher.hash("s3cret").unwrap(),
                roles: vec!["ROLE_ADMIN".into()],
            },
        )]);
        FormLoginAuthenticator::new(
            FormLoginConfig {
                login_path: "/login".into(),
                default_target_path: "/dashboard".into(),
                username_parameter: "username".into(),
                password_parameter: "password".into(),
            },
            Arc::new(MemoryUserProvider::new(&users)),
            hasher,
            Arc::new(LoginThrottle::default()),
        )
    }

    fn login_request(body: &str, session: Session) -> AuthRequest {
        let request = Request::post("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::empty())
            .unwrap();
        auth_request(request, body, session)
    }

    #[test]
    fn test_supports_only_post_login() {
        let auth = authenticator();
        let (post, _) = Request::post("/login").body(()).unwrap().into_parts();
        let (get, _) = Request::get("/login").body(()).unwrap().into_parts();
        assert!(auth.supports(&post));
        assert!(!auth.supports(&get));
    }

    #[tokio::test]
    async fn test_valid_login_and_target_redirect() {
        let auth = authenticator();
        let session = Session::detached();
        let token = csrf_token(&session);
        session.insert(TARGET_PATH_KEY, "/games/1").unwrap();

        let request = login_request(
            &format!("username=fox&password=s3cret&csrf_token={}", token),
            session.clone(),
        );
        let passport = auth.authenticate(&request).await.unwrap();
        assert_eq!(passport.user_badge, "fox");
        assert_eq!(passport.roles, vec!["ROLE_ADMIN"]);

        let user = passport.into_user("main", auth.name());
        let response = auth.on_success(&user, &request).await.unwrap();
        assert_eq!(response.headers()["location"], "/games/1");
        assert!(!session.contains(TARGET_PATH_KEY));
    }

    #[tokio::test]
    async fn test_failures() {
        let auth = authenticator();
        let session = Session::detached();
        let token = csrf_token(&session);

        let bad_csrf = login_request("username=fox&password=s3cret&csrf_token=nope", session.clone());
        assert!(matches!(auth.authenticate(&bad_csrf).await, Err(AuthError::InvalidCsrf)));

        let wrong = login_request(
            &format!("username=fox&password=wrong&csrf_token={}", token),
            session.clone(),
        );
        let error = auth.authenticate(&wrong).await.unwrap_err();
        assert!(matches!(error, AuthError::BadCredentials));
        assert_eq!(session.get::<String>(LAST_USERNAME_KEY).as_deref(), Some("fox"));

        let response = auth.on_failure(&error, &wrong).await;
        assert_eq!(response.headers()["location"], "/login");
        assert_eq!(session.take_flashes(AUTH_ERROR_FLASH), vec!["Invalid credentials."]);

        let unknown = login_request(
            &format!("username=owl&password=x&csrf_token={}", token),
            session.clone(),
        );
        assert!(matches!(auth.authenticate(&unknown).await, Err(AuthError::BadCredentials)));
        // 未知用户也走了一次占位哈希校验
        assert!(auth.hasher.dummy_is_initialized());
    }

    #[tokio::test]
    async fn test_throttled_after_five_failures() {
        let auth = authenticator();
        let session = Session::detached();
        let token = csrf_token(&session);
        let body = format!("username=fox&password=wrong&csrf_token={}", token);
        for _ in 0..5 {
            let request = login_request(&body, session.clone());
            assert!(matches!(auth.authenticate(&request).await, Err(AuthError::BadCredentials)));
        }
        let request = login_request(
            &format!("username=fox&password=s3cret&csrf_token={}", token),
            session,
        );
        let error = auth.authenticate(&request).await.unwrap_err();
        assert!(matches!(error, AuthError::TooManyAttempts));
        assert_eq!(error.status_code().as_u16(), 429);
    }

    #[tokio::test]
    async fn test_non_form_body_rejected() {
        let auth = authenticator();
        let request = Request::post("/login")
            .header("content-type", "application/json")
            .body(Body::empty())
            .unwrap();
        let request = auth_request(request, "{}", Session::detached());
        assert!(matches!(
            auth.authenticate(&request).await,
            Err(AuthError::UnsupportedRequest(_))
        ));
    }
}
