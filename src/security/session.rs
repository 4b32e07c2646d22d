//! 内存会话存储
//!
//! 会话 id 存在 Cookie 中，数据保存在进程内，按 TTL 滑动过期。
//! 请求开始时取出数据副本，结束时写回（同一会话并发请求以最后写入为准）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, header, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use parking_lot::{Mutex, RwLock};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FrameworkError;
use crate::model::config::SessionConfig;

/// 会话内容
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    values: BTreeMap<String, Value>,
    flashes: BTreeMap<String, Vec<String>>,
}

impl SessionData {
    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.flashes.values().all(Vec::is_empty)
    }
}

struct StoredSession {
    data: SessionData,
    expires_at: Instant,
}

/// 会话存储
pub struct SessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    ttl: Duration,
    cookie_name: String,
    secure: bool,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs.max(1)),
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// 读取会话数据（过期则删除）
    pub fn load(&self, id: &str) -> Option<SessionData> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(id) {
                Some(stored) if stored.expires_at > now => return Some(stored.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().remove(id);
        None
    }

    pub fn save(&self, id: &str, data: SessionData) {
        self.sessions.write().insert(
            id.to_string(),
            StoredSession {
                data,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn destroy(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// 清理过期会话，返回清理数量
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// 根据请求 Cookie 打开会话
    pub fn start(&self, headers: &HeaderMap) -> Session {
        let jar = CookieJar::from_headers(headers);
        let cookie_id = jar.get(&self.cookie_name).map(|c| c.value().to_string());
        let (id, data) = match cookie_id.as_deref().and_then(|id| self.load(id).map(|d| (id, d))) {
            Some((id, data)) => (Some(id.to_string()), data),
            None => (None, SessionData::default()),
        };
        Session {
            inner: Arc::new(Mutex::new(SessionState {
                original_id: id.clone(),
                had_cookie: cookie_id.is_some(),
                id,
                data,
                modified: false,
            })),
        }
    }

    /// 请求结束：写回会话并在需要时设置 Cookie
    pub fn finish(&self, session: &Session, headers: &mut HeaderMap) {
        let mut state = session.inner.lock();

        if let Some(original) = state.original_id.clone() {
            if state.id.as_deref() != Some(original.as_str()) {
                self.destroy(&original);
            }
        }

        if state.data.is_empty() {
            if let Some(id) = state.id.take() {
                self.destroy(&id);
            }
            if state.had_cookie {
                self.append_cookie(headers, "", true);
            }
            return;
        }

        let id = state.id.get_or_insert_with(new_session_id).clone();
        let id_changed = state.original_id.as_deref() != Some(id.as_str());
        self.save(&id, state.data.clone());
        if id_changed || state.modified {
            self.append_cookie(headers, &id, false);
        }
    }

    fn append_cookie(&self, headers: &mut HeaderMap, value: &str, remove: bool) {
        let mut cookie = Cookie::build((self.cookie_name.clone(), value.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure);
        if remove {
            cookie = cookie.max_age(time::Duration::ZERO);
        }
        match HeaderValue::from_str(&cookie.build().to_string()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("会话 Cookie 无效: {}", e),
        }
    }
}

fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

struct SessionState {
    id: Option<String>,
    original_id: Option<String>,
    had_cookie: bool,
    data: SessionData,
    modified: bool,
}

/// 当前请求的会话句柄（可克隆，共享同一份数据）
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
}

impl Session {
    /// 脱离存储的空会话（测试与无状态场景）
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState {
                id: None,
                original_id: None,
                had_cookie: false,
                data: SessionData::default(),
                modified: false,
            })),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.inner.lock().id.clone()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let state = self.inner.lock();
        let value = state.data.values.get(key)?.clone();
        serde_json::from_value(value).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().data.values.contains_key(key)
    }

    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let mut state = self.inner.lock();
        state.data.values.insert(key.to_string(), value);
        state.modified = true;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.lock();
        let removed = state.data.values.remove(key);
        if removed.is_some() {
            state.modified = true;
        }
        removed
    }

    /// 取出并删除
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.remove(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// 添加闪存消息（下一次读取后清除）
    pub fn flash(&self, kind: &str, message: impl Into<String>) {
        let mut state = self.inner.lock();
        state
            .data
            .flashes
            .entry(kind.to_string())
            .or_default()
            .push(message.into());
        state.modified = true;
    }

    pub fn take_flashes(&self, kind: &str) -> Vec<String> {
        let mut state = self.inner.lock();
        let flashes = state.data.flashes.remove(kind).unwrap_or_default();
        if !flashes.is_empty() {
            state.modified = true;
        }
        flashes
    }

    /// 取出全部闪存消息（模板渲染用）
    pub fn take_all_flashes(&self) -> BTreeMap<String, Vec<String>> {
        let mut state = self.inner.lock();
        let flashes = std::mem::take(&mut state.data.flashes);
        if !flashes.is_empty() {
            state.modified = true;
        }
        flashes
    }

    /// 更换会话 id 并保留数据（登录后防止会话固定）
    pub fn migrate(&self) {
        let mut state = self.inner.lock();
        state.id = Some(new_session_id());
        state.modified = true;
    }

    /// 清空会话（登出）
    pub fn invalidate(&self) {
        let mut state = self.inner.lock();
        state.data = SessionData::default();
        state.id = None;
        state.modified = true;
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = FrameworkError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| FrameworkError::Internal(anyhow::anyhow!("会话不可用：未挂载安全中间件")))
    }
}
