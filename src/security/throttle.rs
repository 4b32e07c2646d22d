//! 登录限流：同一 IP + 用户名 15 分钟内最多 5 次失败尝试

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

const MAX_ATTEMPTS: u8 = 5;
const WINDOW_DURATION: Duration = Duration::from_secs(15 * 60);

struct ThrottleEntry {
    attempts: u8,
    window_start: Instant,
}

/// 登录尝试计数器
pub struct LoginThrottle {
    entries: RwLock<HashMap<String, ThrottleEntry>>,
    max_attempts: u8,
    window: Duration,
}

impl Default for LoginThrottle {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, WINDOW_DURATION)
    }
}

impl LoginThrottle {
    pub fn new(max_attempts: u8, window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    fn key(ip: &str, username: &str) -> String {
        format!("{}|{}", ip, username.to_lowercase())
    }

    /// 记录一次尝试；超过限制返回 false
    pub fn check(&self, ip: &str, username: &str) -> bool {
        let mut entries = self.entries.write();
        let now = Instant::now();

        let entry = entries.entry(Self::key(ip, username)).or_insert(ThrottleEntry {
            attempts: 0,
            window_start: now,
        });

        // 时间窗口过期则重置
        if now.duration_since(entry.window_start) > self.window {
            entry.attempts = 0;
            entry.window_start = now;
        }

        if entry.attempts >= self.max_attempts {
            return false;
        }
        entry.attempts += 1;
        true
    }

    /// 登录成功后清除计数
    pub fn reset(&self, ip: &str, username: &str) {
        self.entries.write().remove(&Self::key(ip, username));
    }

    /// 清理过期条目
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries
            .write()
            .retain(|_, entry| now.duration_since(entry.window_start) <= self.window);
    }
}
