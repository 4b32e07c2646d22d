//! 安全组件装配
//!
//! 从 `security` 配置构建用户提供者、防火墙与访问控制表

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};

use super::access::{AccessControl, RoleHierarchy};
use super::authenticator::{Authenticator, FormLoginAuthenticator, JwtAuthenticator, OAuthAuthenticator};
use super::firewall::{Firewall, FirewallMap};
use super::jwt::JwtManager;
use super::passport::AuthenticatedUser;
use super::password::PasswordHasher;
use super::session::{Session, SessionStore};
use super::throttle::LoginThrottle;
use super::user::{EntityUserProvider, MemoryUserProvider, UserProvider};
use crate::model::config::Config;
use crate::orm::Database;

const DEFAULT_JWT_TTL: u64 = 60 * 60;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// 由应用代码注册的提供者与认证器
#[derive(Default)]
pub struct SecurityExtensions {
    pub providers: BTreeMap<String, Arc<dyn UserProvider>>,
    /// `(防火墙名, 认证器)`
    pub authenticators: Vec<(String, Arc<dyn Authenticator>)>,
}

/// 安全管理器
pub struct Security {
    firewalls: FirewallMap,
    access: AccessControl,
    sessions: Arc<SessionStore>,
    providers: BTreeMap<String, Arc<dyn UserProvider>>,
    jwt: JwtManager,
    hasher: PasswordHasher,
    throttle: Arc<LoginThrottle>,
    max_body_size: usize,
}

impl Security {
    pub fn from_config(
        config: &Config,
        db: &Database,
        sessions: Arc<SessionStore>,
        extensions: SecurityExtensions,
    ) -> anyhow::Result<Self> {
        let security = &config.security;
        let secret = &config.application.secret_key;

        let mut providers: BTreeMap<String, Arc<dyn UserProvider>> = BTreeMap::new();
        for (name, provider) in &security.providers {
            if let Some(entity) = &provider.entity {
                let entity = EntityUserProvider::new(db.clone(), entity)
                    .with_context(|| format!("用户提供者 {} 配置无效", name))?;
                providers.insert(name.clone(), Arc::new(entity));
            } else if let Some(users) = &provider.memory {
                providers.insert(name.clone(), Arc::new(MemoryUserProvider::new(users)));
            } else {
                bail!("用户提供者 {} 未声明 entity 或 memory", name);
            }
        }
        providers.extend(extensions.providers);

        let jwt_ttl = security
            .firewalls
            .iter()
            .find_map(|(_, f)| f.jwt.as_ref().map(|j| j.ttl_secs))
            .unwrap_or(DEFAULT_JWT_TTL);
        let hasher = PasswordHasher::default();
        let throttle = Arc::new(LoginThrottle::default());

        let mut firewalls = Vec::with_capacity(security.firewalls.len());
        for (name, fc) in &security.firewalls {
            let mut firewall = Firewall::new(name.clone(), &fc.pattern, fc.stateless)?;

            if let Some(form_login) = &fc.form_login {
                let provider = resolve_provider(&providers, fc.provider.as_deref())
                    .with_context(|| format!("防火墙 {} 的 form_login 需要用户提供者", name))?;
                firewall = firewall
                    .with_login_path(form_login.login_path.clone())
                    .with_authenticator(Arc::new(FormLoginAuthenticator::new(
                        form_login.clone(),
                        provider,
                        hasher.clone(),
                        throttle.clone(),
                    )));
            }
            if let Some(jwt) = &fc.jwt {
                firewall = firewall
                    .with_authenticator(Arc::new(JwtAuthenticator::new(JwtManager::new(secret, jwt.ttl_secs))));
            }
            if let Some(oauth) = &fc.oauth {
                firewall = firewall.with_authenticator(Arc::new(OAuthAuthenticator::new(oauth.clone())?));
            }
            if let Some(logout) = &fc.logout {
                firewall = firewall.with_logout(logout.clone());
            }
            firewalls.push(firewall);
        }

        let mut firewalls = FirewallMap::new(firewalls);
        for (name, authenticator) in extensions.authenticators {
            let firewall = firewalls
                .get_mut(&name)
                .with_context(|| format!("认证器 {} 指向不存在的防火墙 {}", authenticator.name(), name))?;
            firewall.push_authenticator(authenticator);
        }

        let access = AccessControl::new(
            &security.access_control,
            RoleHierarchy::new(security.role_hierarchy.clone()),
        )?;

        tracing::debug!(
            firewalls = security.firewalls.len(),
            providers = providers.len(),
            rules = security.access_control.len(),
            "安全组件已加载"
        );
        Ok(Self {
            firewalls,
            access,
            sessions,
            providers,
            jwt: JwtManager::new(secret, jwt_ttl),
            hasher,
            throttle,
            max_body_size: config.application.max_body_size,
        })
    }

    pub fn firewalls(&self) -> &FirewallMap {
        &self.firewalls
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// 签发 API token 用
    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn UserProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    pub(crate) fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// 以编程方式登录（注册后自动登录等）
    pub fn login(&self, session: &Session, firewall: &str, user: &AuthenticatedUser) -> anyhow::Result<()> {
        let key = self
            .firewalls
            .iter()
            .find(|f| f.name() == firewall)
            .map(Firewall::session_key)
            .with_context(|| format!("防火墙 {} 不存在", firewall))?;
        session.migrate();
        session.insert(&key, user)?;
        Ok(())
    }

    /// 后台定期清理过期会话与限流记录
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let security = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = security.sessions.cleanup_expired();
                security.throttle.cleanup_expired();
                if removed > 0 {
                    tracing::debug!("已清理 {} 个过期会话", removed);
                }
            }
        });
    }
}

/// 未指定时使用唯一（或第一个）提供者
fn resolve_provider(
    providers: &BTreeMap<String, Arc<dyn UserProvider>>,
    name: Option<&str>,
) -> anyhow::Result<Arc<dyn UserProvider>> {
    match name {
        Some(name) => providers
            .get(name)
            .cloned()
            .with_context(|| format!("用户提供者 {} 不存在", name)),
        None => providers
            .values()
            .next()
            .cloned()
            .context("未配置任何用户提供者"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::SessionConfig;
    use crate::security::passport::{Credentials, Passport};

    fn build(yaml: &str) -> anyhow::Result<Security> {
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let db = Database::open_in_memory().unwrap();
        Security::from_config(
            &config,
            &db,
            Arc::new(SessionStore::new(&SessionConfig::default())),
            SecurityExtensions::default(),
        )
    }

    #[test]
    fn test_builds_firewalls_from_config() {
        let security = build(
            r#"
security:
  providers:
    users:
      entity: { table: user, property: email }
  firewalls:
    api:
      pattern: ^/api
      stateless: true
      jwt: { ttl_secs: 120 }
    main:
      pattern: ^/
      form_login: { login_path: /signin }
      logout: { path: /signout }
"#,
        )
        .unwrap();

        let names: Vec<&str> = security.firewalls().iter().map(Firewall::name).collect();
        assert_eq!(names, vec!["api", "main"]);
        let main = security.firewalls().matching("/games").unwrap();
        assert_eq!(main.login_path(), Some("/signin"));
        assert_eq!(main.authenticators()[0].name(), "form_login");
        assert!(security.firewalls().matching("/api/x").unwrap().is_stateless());
        assert_eq!(security.jwt().ttl_secs(), 120);
        assert!(security.provider("users").is_some());
    }

    #[test]
    fn test_form_login_without_provider_fails() {
        let result = build(
            r#"
security:
  firewalls:
    main:
      form_login: {}
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_login_stores_user_under_firewall_key() {
        let security = build(
            r#"
security:
  firewalls:
    main:
      pattern: ^/
"#,
        )
        .unwrap();
        let session = Session::detached();
        let user = Passport::new("fox", Credentials::None).into_user("main", "manual");
        security.login(&session, "main", &user).unwrap();
        assert_eq!(session.get::<AuthenticatedUser>("_security.main"), Some(user.clone()));
        assert!(session.id().is_some());
        assert!(security.login(&session, "missing", &user).is_err());
    }
}
