//! 安全中间件
//!
//! 打开会话、处理登出、运行认证器、执行访问控制，最后写回会话 Cookie

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::access::AccessDecision;
use super::authenticator::{AuthRequest, TARGET_PATH_KEY};
use super::firewall::Firewall;
use super::passport::AuthenticatedUser;
use super::service::Security;
use super::session::Session;
use crate::error::FrameworkError;
use crate::profiler::context::{self as profile_context, SecuritySnapshot};

pub async fn security_middleware(
    State(security): State<Arc<Security>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let firewall = security.firewalls().matching(&path);
    let stateful = firewall.is_none_or(|f| !f.is_stateless());

    let session = if stateful {
        security.sessions().start(request.headers())
    } else {
        Session::detached()
    };
    request.extensions_mut().insert(session.clone());

    let response = match firewall {
        Some(firewall) => handle_firewall(&security, firewall, &session, request, next).await,
        None => {
            let (decision, _) = security.access().decide(request.method(), &path, None);
            profile_context::record_security(SecuritySnapshot {
                decision: Some(decision.as_str().to_string()),
                ..Default::default()
            });
            match decision {
                AccessDecision::Granted => next.run(request).await,
                _ => denied(None, &session, &request, decision),
            }
        }
    };

    finish(&security, stateful, &session, response)
}

fn finish(security: &Security, stateful: bool, session: &Session, mut response: Response) -> Response {
    if stateful {
        security.sessions().finish(session, response.headers_mut());
    }
    response
}

async fn handle_firewall(
    security: &Security,
    firewall: &Firewall,
    session: &Session,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut user: Option<AuthenticatedUser> = if firewall.is_stateless() {
        None
    } else {
        session.get(&firewall.session_key())
    };

    let (mut parts, mut body) = request.into_parts();

    if let Some(target) = firewall.logout_target(&parts) {
        if let Some(user) = &user {
            tracing::info!(user = %user.identifier, firewall = firewall.name(), "用户登出");
        }
        session.invalidate();
        return Redirect::to(target).into_response();
    }

    let mut authenticator_name = user.as_ref().map(|u| u.authenticator.clone());

    if let Some(authenticator) = firewall.authenticator_for(&parts) {
        let needs_body = authenticator.needs_body();
        let bytes = if needs_body {
            match axum::body::to_bytes(std::mem::take(&mut body), security.max_body_size()).await {
                Ok(bytes) => bytes,
                Err(_) => return FrameworkError::PayloadTooLarge.into_response(),
            }
        } else {
            Bytes::new()
        };

        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let auth_request = AuthRequest {
            parts,
            body: bytes,
            session: session.clone(),
            ip,
            firewall: firewall.name().to_string(),
        };

        if let Some(response) = authenticator.intercept(&auth_request).await {
            return response;
        }

        match authenticator.authenticate(&auth_request).await {
            Ok(passport) => {
                let authenticated = passport.into_user(firewall.name(), authenticator.name());
                tracing::info!(
                    user = %authenticated.identifier,
                    firewall = firewall.name(),
                    authenticator = authenticator.name(),
                    "认证成功"
                );
                if !firewall.is_stateless() {
                    session.migrate();
                    if let Err(e) = session.insert(&firewall.session_key(), &authenticated) {
                        return FrameworkError::Internal(e.into()).into_response();
                    }
                }
                record_snapshot(firewall, Some(&authenticated), authenticator.name());
                if let Some(response) = authenticator.on_success(&authenticated, &auth_request).await {
                    return response;
                }
                authenticator_name = Some(authenticator.name().to_string());
                user = Some(authenticated);
            }
            Err(error) => {
                if error.status_code().is_server_error() {
                    tracing::error!(firewall = firewall.name(), "认证出错: {:?}", error);
                } else {
                    tracing::warn!(
                        firewall = firewall.name(),
                        authenticator = authenticator.name(),
                        "认证失败: {}",
                        error
                    );
                }
                record_snapshot(firewall, None, authenticator.name());
                return authenticator.on_failure(&error, &auth_request).await;
            }
        }

        parts = auth_request.parts;
        if needs_body {
            body = Body::from(auth_request.body);
        }
    }

    let mut request = Request::from_parts(parts, body);

    profile_context::record_security(SecuritySnapshot {
        authenticated: user.is_some(),
        user: user.as_ref().map(|u| u.identifier.clone()),
        roles: user.as_ref().map(|u| u.roles.clone()).unwrap_or_default(),
        firewall: Some(firewall.name().to_string()),
        authenticator: authenticator_name,
        decision: None,
    });

    let (decision, rule) = security
        .access()
        .decide(request.method(), request.uri().path(), user.as_ref());
    profile_context::record_access_decision(decision.as_str());
    if !decision.is_granted() {
        tracing::debug!(
            path = request.uri().path(),
            rule = rule.unwrap_or(""),
            decision = decision.as_str(),
            "访问被拒绝"
        );
        return denied(Some(firewall), session, &request, decision);
    }

    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

fn record_snapshot(firewall: &Firewall, user: Option<&AuthenticatedUser>, authenticator: &str) {
    profile_context::record_security(SecuritySnapshot {
        authenticated: user.is_some(),
        user: user.map(|u| u.identifier.clone()),
        roles: user.map(|u| u.roles.clone()).unwrap_or_default(),
        firewall: Some(firewall.name().to_string()),
        authenticator: Some(authenticator.to_string()),
        decision: None,
    });
}

/// 拒绝访问：未登录跳转登录页（表单防火墙）或 401，已登录 403
fn denied(
    firewall: Option<&Firewall>,
    session: &Session,
    request: &Request<Body>,
    decision: AccessDecision,
) -> Response {
    match decision {
        AccessDecision::DeniedAnonymous => {
            let login_path = firewall
                .filter(|f| !f.is_stateless())
                .and_then(Firewall::login_path);
            match login_path {
                Some(login_path) => {
                    if request.method() == Method::GET {
                        let target = request
                            .uri()
                            .path_and_query()
                            .map(|p| p.as_str().to_string())
                            .unwrap_or_else(|| request.uri().path().to_string());
                        if let Err(e) = session.insert(TARGET_PATH_KEY, target) {
                            tracing::warn!("保存登录跳转地址失败: {}", e);
                        }
                    }
                    Redirect::to(login_path).into_response()
                }
                None => FrameworkError::Unauthorized(
                    "Full authentication is required to access this resource.".to_string(),
                )
                .into_response(),
            }
        }
        _ => FrameworkError::Forbidden("Access denied.".to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::model::config::{Config, SessionConfig};
    use crate::orm::Database;
    use crate::security::{CurrentUser, PasswordHasher, SecurityExtensions, SessionStore, csrf_token};

    fn security() -> Arc<Security> {
        let hasher = PasswordHasher::with_cost(4);
        let yaml = format!(
            r#"
security:
  providers:
    users:
      memory:
        fox: {{ password: "{fox}", roles: [ROLE_ADMIN] }}
        owl: {{ password: "{owl}", roles: [ROLE_USER] }}
  firewalls:
    api:
      pattern: ^/api
      stateless: true
      jwt: {{}}
    main:
      pattern: ^/
      form_login: {{ login_path: /login }}
      logout: {{ path: /logout, target: / }}
  access_control:
    - {{ path: ^/login, roles: [PUBLIC_ACCESS] }}
    - {{ path: ^/admin, roles: [ROLE_ADMIN] }}
    - {{ path: ^/api, roles: [IS_AUTHENTICATED] }}
"#,
            fox = hasher.hash("fox-pass").unwrap(),
            owl = hasher.hash("owl-pass").unwrap(),
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let sessions = Arc::new(SessionStore::new(&SessionConfig::default()));
        let db = Database::open_in_memory().unwrap();
        Arc::new(Security::from_config(&config, &db, sessions, SecurityExtensions::default()).unwrap())
    }

    fn app(security: Arc<Security>) -> Router {
        Router::new()
            .route("/", get(|| async { "home" }))
            .route("/login", get(|session: Session| async move { csrf_token(&session) }))
            .route("/admin", get(|CurrentUser(user): CurrentUser| async move { user.identifier }))
            .route("/api/me", get(|CurrentUser(user): CurrentUser| async move { user.identifier }))
            .layer(middleware::from_fn_with_state(security, security_middleware))
    }

    fn session_cookie(response: &Response) -> Option<String> {
        response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("framefox_session="))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::get(uri).header("cookie", cookie).body(Body::empty()).unwrap()
    }

    async fn login(app: &Router, user: &str, password: &str) -> (Response, String) {
        let page = app.clone().oneshot(Request::get("/login").body(Body::empty()).unwrap()).await.unwrap();
        let cookie = session_cookie(&page).unwrap();
        let token = body_text(page).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/login")
                    .header("cookie", &cookie)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(format!(
                        "username={}&password={}&csrf_token={}",
                        user, password, token
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        (response, cookie)
    }

    #[tokio::test]
    async fn test_anonymous_redirected_to_login_with_target() {
        let app = app(security());
        let response = app
            .clone()
            .oneshot(Request::get("/admin?tab=users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");
        let cookie = session_cookie(&response).unwrap();

        // 登录后回到原地址
        let page = app.clone().oneshot(get_with_cookie("/login", &cookie)).await.unwrap();
        let token = body_text(page).await;
        let response = app
            .clone()
            .oneshot(
                Request::post("/login")
                    .header("cookie", &cookie)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(format!("username=fox&password=fox-pass&csrf_token={}", token)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["location"], "/admin?tab=users");
    }

    #[tokio::test]
    async fn test_login_session_and_logout() {
        let app = app(security());
        let (response, old_cookie) = login(&app, "fox", "fox-pass").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/");
        let cookie = session_cookie(&response).unwrap();
        assert_ne!(cookie, old_cookie);

        let response = app.clone().oneshot(get_with_cookie("/admin", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "fox");

        // 旧会话 id 已失效
        let response = app.clone().oneshot(get_with_cookie("/admin", &old_cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = app.clone().oneshot(get_with_cookie("/logout", &cookie)).await.unwrap();
        assert_eq!(response.headers()["location"], "/");
        assert_eq!(session_cookie(&response).as_deref(), Some("framefox_session="));

        let response = app.clone().oneshot(get_with_cookie("/admin", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "/login");
    }

    #[tokio::test]
    async fn test_bad_password_flashes_error() {
        let security = security();
        let app = app(security.clone());
        let (response, cookie) = login(&app, "fox", "nope").await;
        assert_eq!(response.headers()["location"], "/login");

        let id = cookie.trim_start_matches("framefox_session=");
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("cookie", format!("framefox_session={}", id).parse().unwrap());
        let session = security.sessions().start(&headers);
        assert_eq!(session.take_flashes("error"), vec!["Invalid credentials."]);
    }

    #[tokio::test]
    async fn test_insufficient_role_is_forbidden() {
        let app = app(security());
        let (response, _) = login(&app, "owl", "owl-pass").await;
        let cookie = session_cookie(&response).unwrap();
        let response = app.clone().oneshot(get_with_cookie("/admin", &cookie)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_stateless_jwt_firewall() {
        let security = security();
        let (token, _) = security.jwt().issue("fox", &["ROLE_ADMIN".into()]).unwrap();
        let app = app(security);

        let response = app
            .clone()
            .oneshot(Request::get("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/me")
                    .header("authorization", "Bearer forged")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/me")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
        assert_eq!(body_text(response).await, "fox");
    }

    #[tokio::test]
    async fn test_public_page_without_session_sets_no_cookie() {
        let app = app(security());
        let response = app.oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).is_none());
    }
}
