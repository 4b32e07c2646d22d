//! 用户提供者

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::error::AuthError;
use crate::model::config::{EntityProviderConfig, MemoryUserConfig};
use crate::orm::{Database, SqlValue};

/// 认证所需的用户信息
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityUser {
    pub identifier: String,
    /// bcrypt 哈希（OAuth 等外部用户可为空）
    pub password_hash: Option<String>,
    pub roles: Vec<String>,
}

/// 按标识加载用户
#[async_trait]
pub trait UserProvider: Send + Sync {
    async fn load_user(&self, identifier: &str) -> Result<Option<SecurityUser>, AuthError>;
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"))
}

/// 从实体表加载用户（列：标识列、`password`、`roles`）
pub struct EntityUserProvider {
    db: Database,
    table: String,
    property: String,
}

impl EntityUserProvider {
    pub fn new(db: Database, config: &EntityProviderConfig) -> anyhow::Result<Self> {
        for name in [&config.table, &config.property] {
            if !identifier_regex().is_match(name) {
                anyhow::bail!("非法的用户表或列名: {}", name);
            }
        }
        Ok(Self {
            db,
            table: config.table.clone(),
            property: config.property.clone(),
        })
    }
}

/// 角色列支持 JSON 数组或逗号分隔
fn parse_roles(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Vec::new();
    };
    if let Ok(roles) = serde_json::from_str::<Vec<String>>(&raw) {
        return roles;
    }
    raw.split(',')
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

#[async_trait]
impl UserProvider for EntityUserProvider {
    async fn load_user(&self, identifier: &str) -> Result<Option<SecurityUser>, AuthError> {
        let sql = format!(
            "SELECT \"{prop}\", password, roles FROM \"{table}\" WHERE \"{prop}\" = ?1 LIMIT 1",
            prop = self.property,
            table = self.table
        );
        let params = [SqlValue::Text(identifier.to_string())];
        let rows = self.db.query(&sql, &params, |row| {
            Ok(SecurityUser {
                identifier: row.get(0)?,
                password_hash: row.get(1)?,
                roles: parse_roles(row.get(2)?),
            })
        })?;
        Ok(rows.into_iter().next())
    }
}

/// 配置文件中声明的内存用户
pub struct MemoryUserProvider {
    users: BTreeMap<String, SecurityUser>,
}

impl MemoryUserProvider {
    pub fn new(users: &BTreeMap<String, MemoryUserConfig>) -> Self {
        Self {
            users: users
                .iter()
                .map(|(name, user)| {
                    (
                        name.clone(),
                        SecurityUser {
                            identifier: name.clone(),
                            password_hash: Some(user.password.clone()),
                            roles: user.roles.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl UserProvider for MemoryUserProvider {
    async fn load_user(&self, identifier: &str) -> Result<Option<SecurityUser>, AuthError> {
        Ok(self.users.get(identifier).cloned())
    }
}
