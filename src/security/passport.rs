//! Passport 与已认证用户

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 认证时出示的凭据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    Password,
    Token,
    None,
}

/// 认证器的产出：用户标识、凭据、角色与附加属性
#[derive(Debug, Clone)]
pub struct Passport {
    pub user_badge: String,
    pub credentials: Credentials,
    pub roles: Vec<String>,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Passport {
    pub fn new(user_badge: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            user_badge: user_badge.into(),
            credentials,
            roles: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// 转换为挂在请求上的已认证用户
    pub fn into_user(self, firewall: &str, authenticator: &str) -> AuthenticatedUser {
        let mut roles = self.roles;
        if roles.is_empty() {
            roles.push("ROLE_USER".to_string());
        }
        AuthenticatedUser {
            identifier: self.user_badge,
            roles,
            firewall: firewall.to_string(),
            authenticator: authenticator.to_string(),
            attributes: self.attributes,
        }
    }
}

/// 已认证用户（存入会话，也作为请求扩展）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub identifier: String,
    pub roles: Vec<String>,
    pub firewall: String,
    pub authenticator: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AuthenticatedUser {
    /// 直接声明的角色（不展开层级）
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
