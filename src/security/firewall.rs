//! 防火墙

use std::sync::Arc;

use anyhow::Context;
use axum::http::{Method, request::Parts};
use regex::Regex;

use super::authenticator::Authenticator;
use crate::model::config::LogoutConfig;

/// 按路径正则匹配请求的一组认证规则
pub struct Firewall {
    name: String,
    pattern: Regex,
    stateless: bool,
    authenticators: Vec<Arc<dyn Authenticator>>,
    /// 表单登录入口（未登录被拒绝时跳转）
    login_path: Option<String>,
    logout: Option<LogoutConfig>,
}

impl Firewall {
    pub fn new(name: impl Into<String>, pattern: &str, stateless: bool) -> anyhow::Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .with_context(|| format!("防火墙 {} 的 pattern 无效: {}", name, pattern))?;
        Ok(Self {
            name,
            pattern,
            stateless,
            authenticators: Vec::new(),
            login_path: None,
            logout: None,
        })
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    pub fn with_logout(mut self, logout: LogoutConfig) -> Self {
        self.logout = Some(logout);
        self
    }

    pub(crate) fn push_authenticator(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticators.push(authenticator);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    pub fn login_path(&self) -> Option<&str> {
        self.login_path.as_deref()
    }

    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    /// 第一个支持该请求的认证器
    pub fn authenticator_for(&self, parts: &Parts) -> Option<Arc<dyn Authenticator>> {
        self.authenticators.iter().find(|a| a.supports(parts)).cloned()
    }

    /// 登出请求时返回跳转目标
    pub fn logout_target(&self, parts: &Parts) -> Option<&str> {
        let logout = self.logout.as_ref()?;
        let is_logout = matches!(parts.method, Method::GET | Method::POST) && parts.uri.path() == logout.path;
        is_logout.then_some(logout.target.as_str())
    }

    /// 会话中保存已认证用户的键
    pub fn session_key(&self) -> String {
        format!("_security.{}", self.name)
    }
}

/// 按声明顺序排列的防火墙
#[derive(Default)]
pub struct FirewallMap {
    firewalls: Vec<Firewall>,
}

impl FirewallMap {
    pub fn new(firewalls: Vec<Firewall>) -> Self {
        Self { firewalls }
    }

    /// 首个匹配的防火墙
    pub fn matching(&self, path: &str) -> Option<&Firewall> {
        self.firewalls.iter().find(|f| f.matches(path))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Firewall> {
        self.firewalls.iter_mut().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Firewall> {
        self.firewalls.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.firewalls.is_empty()
    }
}
