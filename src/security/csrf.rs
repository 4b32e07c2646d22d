//! CSRF token（每个会话一个）

use uuid::Uuid;

use super::session::Session;
use crate::common::auth::constant_time_eq;

/// 会话中保存 token 的键
pub const CSRF_SESSION_KEY: &str = "_csrf_token";

/// 获取当前会话的 token（不存在则生成并保存）
pub fn csrf_token(session: &Session) -> String {
    if let Some(token) = session.get::<String>(CSRF_SESSION_KEY) {
        return token;
    }
    let token = Uuid::new_v4().simple().to_string();
    if let Err(e) = session.insert(CSRF_SESSION_KEY, &token) {
        tracing::warn!("保存 CSRF token 失败: {}", e);
    }
    token
}

/// 校验提交的 token
pub fn verify_csrf(session: &Session, submitted: Option<&str>) -> bool {
    match (session.get::<String>(CSRF_SESSION_KEY), submitted) {
        (Some(expected), Some(submitted)) => constant_time_eq(&expected, submitted),
        _ => false,
    }
}
