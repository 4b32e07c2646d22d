//! 访问控制与角色层级

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use axum::http::Method;
use regex::Regex;

use super::passport::AuthenticatedUser;
use crate::model::config::AccessRule;

/// 任何人都可访问
pub const PUBLIC_ACCESS: &str = "PUBLIC_ACCESS";
/// 任意已登录用户
pub const IS_AUTHENTICATED: &str = "IS_AUTHENTICATED";

/// 角色层级（`ROLE_ADMIN -> [ROLE_USER]`，可传递）
#[derive(Debug, Clone, Default)]
pub struct RoleHierarchy {
    map: BTreeMap<String, Vec<String>>,
}

impl RoleHierarchy {
    pub fn new(map: BTreeMap<String, Vec<String>>) -> Self {
        Self { map }
    }

    /// 展开后的全部角色
    pub fn reachable_roles(&self, roles: &[String]) -> BTreeSet<String> {
        let mut reachable = BTreeSet::new();
        let mut pending: Vec<&str> = roles.iter().map(String::as_str).collect();
        while let Some(role) = pending.pop() {
            if !reachable.insert(role.to_string()) {
                continue;
            }
            if let Some(children) = self.map.get(role) {
                pending.extend(children.iter().map(String::as_str));
            }
        }
        reachable
    }
}

/// 访问判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    /// 未登录被拒绝（跳转登录页或 401）
    DeniedAnonymous,
    /// 已登录但权限不足（403）
    DeniedAuthenticated,
}

impl AccessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::DeniedAnonymous => "denied_anonymous",
            Self::DeniedAuthenticated => "denied_authenticated",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

struct CompiledRule {
    source: String,
    pattern: Regex,
    roles: Vec<String>,
    methods: Vec<Method>,
}

/// 有序规则表，首个匹配的规则生效；没有规则匹配时放行
pub struct AccessControl {
    rules: Vec<CompiledRule>,
    hierarchy: RoleHierarchy,
}

impl AccessControl {
    pub fn new(rules: &[AccessRule], hierarchy: RoleHierarchy) -> anyhow::Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.path)
                    .with_context(|| format!("access_control 路径正则无效: {}", rule.path))?;
                let methods = rule
                    .methods
                    .iter()
                    .map(|m| {
                        Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                            .with_context(|| format!("access_control 方法无效: {}", m))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(CompiledRule {
                    source: rule.path.clone(),
                    pattern,
                    roles: rule.roles.clone(),
                    methods,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rules, hierarchy })
    }

    pub fn hierarchy(&self) -> &RoleHierarchy {
        &self.hierarchy
    }

    /// 判定请求是否可访问，同时返回命中的规则
    pub fn decide(
        &self,
        method: &Method,
        path: &str,
        user: Option<&AuthenticatedUser>,
    ) -> (AccessDecision, Option<&str>) {
        let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.pattern.is_match(path) && (r.methods.is_empty() || r.methods.contains(method)))
        else {
            return (AccessDecision::Granted, None);
        };
        let matched = Some(rule.source.as_str());

        if rule.roles.is_empty() || rule.roles.iter().any(|r| r == PUBLIC_ACCESS) {
            return (AccessDecision::Granted, matched);
        }
        let Some(user) = user else {
            return (AccessDecision::DeniedAnonymous, matched);
        };
        if rule.roles.iter().any(|r| r == IS_AUTHENTICATED) {
            return (AccessDecision::Granted, matched);
        }

        // 满足任一角色即可
        let reachable = self.hierarchy.reachable_roles(&user.roles);
        if rule.roles.iter().any(|r| reachable.contains(r)) {
            (AccessDecision::Granted, matched)
        } else {
            (AccessDecision::DeniedAuthenticated, matched)
        }
    }

    /// 用户是否拥有角色（含层级展开）
    pub fn is_granted(&self, user: &AuthenticatedUser, role: &str) -> bool {
        match role {
            PUBLIC_ACCESS | IS_AUTHENTICATED => true,
            _ => self.hierarchy.reachable_roles(&user.roles).contains(role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::passport::{Credentials, Passport};

    fn rule(path: &str, roles: &[&str], methods: &[&str]) -> AccessRule {
        AccessRule {
            path: path.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn user(roles: &[&str]) -> AuthenticatedUser {
        Passport::new("fox", Credentials::Password)
            .with_roles(roles.iter().map(|r| r.to_string()).collect())
            .into_user("main", "form_login")
    }

    fn access() -> AccessControl {
        let hierarchy = RoleHierarchy::new(BTreeMap::from([
            ("ROLE_SUPER".to_string(), vec!["ROLE_ADMIN".to_string()]),
            ("ROLE_ADMIN".to_string(), vec!["ROLE_USER".to_string()]),
        ]));
        AccessControl::new(
            &[
                rule("^/login", &[PUBLIC_ACCESS], &[]),
                rule("^/admin", &["ROLE_ADMIN"], &[]),
                rule("^/games", &["ROLE_USER"], &["POST", "delete"]),
                rule("^/profile", &[IS_AUTHENTICATED], &[]),
            ],
            hierarchy,
        )
        .unwrap()
    }

    #[test]
    fn test_hierarchy_is_transitive() {
        let hierarchy = access().hierarchy().clone();
        let roles = hierarchy.reachable_roles(&["ROLE_SUPER".to_string()]);
        assert!(roles.contains("ROLE_USER"));
        assert_eq!(roles.len(), 3);
    }

    #[test]
    fn test_decisions() {
        let access = access();
        let admin = user(&["ROLE_ADMIN"]);
        let member = user(&["ROLE_USER"]);

        assert_eq!(access.decide(&Method::GET, "/login", None).0, AccessDecision::Granted);
        assert_eq!(access.decide(&Method::GET, "/admin/users", None).0, AccessDecision::DeniedAnonymous);
        assert_eq!(
            access.decide(&Method::GET, "/admin/users", Some(&member)).0,
            AccessDecision::DeniedAuthenticated
        );
        assert_eq!(access.decide(&Method::GET, "/admin/users", Some(&admin)).0, AccessDecision::Granted);
        assert_eq!(access.decide(&Method::GET, "/profile", Some(&member)).0, AccessDecision::Granted);
        assert_eq!(access.decide(&Method::GET, "/profile", None).0, AccessDecision::DeniedAnonymous);
    }

    #[test]
    fn test_method_filter_and_default_grant() {
        let access = access();
        assert_eq!(access.decide(&Method::GET, "/games", None), (AccessDecision::Granted, None));
        let (decision, rule) = access.decide(&Method::DELETE, "/games/1", None);
        assert_eq!(decision, AccessDecision::DeniedAnonymous);
        assert_eq!(rule, Some("^/games"));
        assert_eq!(access.decide(&Method::GET, "/unlisted", None).0, AccessDecision::Granted);
    }

    #[test]
    fn test_is_granted_and_invalid_rule() {
        let access = access();
        assert!(access.is_granted(&user(&["ROLE_SUPER"]), "ROLE_USER"));
        assert!(!access.is_granted(&user(&["ROLE_USER"]), "ROLE_ADMIN"));
        assert!(AccessControl::new(&[rule("(", &[], &[])], RoleHierarchy::default()).is_err());
    }
}
