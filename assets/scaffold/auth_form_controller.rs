use axum::extract::State;
use axum::response::Html;
use framefox::AppState;
use framefox::error::FrameworkError;
use framefox::routing::{Controller, Routes};
use framefox::security::authenticator::{AUTH_ERROR_FLASH, LAST_USERNAME_KEY};
use framefox::security::{Session, csrf_token};
use serde_json::json;

pub struct SecurityController;

impl Controller for SecurityController {
    fn routes(&self, routes: &mut Routes<AppState>) {
        routes.get("{{ login_path }}", "security_login", login);
    }
}

/// 登录提交由防火墙的 form_login 认证器处理，这里只渲染表单
async fn login(State(state): State<AppState>, session: Session) -> Result<Html<String>, FrameworkError> {
    let last_username: Option<String> = session.get(LAST_USERNAME_KEY);
    state.render(
        "security/login.html",
        json!({
            "csrf_token": csrf_token(&session),
            "last_username": last_username.unwrap_or_default(),
            "errors": session.take_flashes(AUTH_ERROR_FLASH),
        }),
    )
}
