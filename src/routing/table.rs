//! 具名路由表
//!
//! 记录所有已注册路由，用于 URL 生成、请求到路由名的反查和 `debug router` 输出

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// 路由表错误
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("路由不存在: {0}")]
    UnknownRoute(String),
    #[error("路由 {route} 缺少参数: {param}")]
    MissingParameter { route: String, param: String },
    #[error("路由名重复: {0}")]
    DuplicateName(String),
    #[error("路由路径无效: {0}")]
    InvalidPath(String),
    #[error("{method} {path} 已被路由 {existing} 注册")]
    DuplicateMethod {
        method: String,
        path: String,
        existing: String,
    },
}

/// 单条路由
#[derive(Debug, Clone, Serialize)]
pub struct RouteEntry {
    pub name: String,
    pub path: String,
    pub methods: Vec<String>,
    /// 注册该路由的控制器
    pub controller: String,
}

#[derive(Debug)]
struct Matcher {
    regex: Regex,
    /// 参数个数越少优先级越高（静态路由优先）
    params: usize,
    index: usize,
}

/// 具名路由表
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    by_name: HashMap<String, usize>,
    matchers: Vec<Matcher>,
}

fn placeholder_pattern() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{(\*?)([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder pattern")
    })
}

impl RouteTable {
    pub fn new(entries: Vec<RouteEntry>) -> Result<Self, RouteError> {
        let placeholder = placeholder_pattern();
        let mut table = Self::default();

        for (index, entry) in entries.into_iter().enumerate() {
            if table.by_name.insert(entry.name.clone(), index).is_some() {
                return Err(RouteError::DuplicateName(entry.name));
            }

            let mut pattern = String::from("^");
            let mut last = 0;
            let mut params = 0;
            for caps in placeholder.captures_iter(&entry.path) {
                let Some(whole) = caps.get(0) else { continue };
                pattern.push_str(&regex::escape(&entry.path[last..whole.start()]));
                pattern.push_str(if &caps[1] == "*" { "(.*)" } else { "([^/]+)" });
                last = whole.end();
                params += 1;
            }
            pattern.push_str(&regex::escape(&entry.path[last..]));
            pattern.push('$');

            let regex =
                Regex::new(&pattern).map_err(|_| RouteError::InvalidPath(entry.path.clone()))?;
            table.matchers.push(Matcher {
                regex,
                params,
                index,
            });
            table.entries.push(entry);
        }

        table.matchers.sort_by_key(|m| (m.params, m.index));
        Ok(table)
    }

    /// 所有路由（按注册顺序）
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&RouteEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// 生成 URL
    ///
    /// 路径参数替换 `{name}` 占位符，其余参数按键排序追加为查询字符串
    pub fn url_for(&self, name: &str, params: &BTreeMap<String, String>) -> Result<String, RouteError> {
        let entry = self
            .get(name)
            .ok_or_else(|| RouteError::UnknownRoute(name.to_string()))?;

        let placeholder = placeholder_pattern();
        let mut used = Vec::new();
        let mut missing = None;
        let path = placeholder.replace_all(&entry.path, |caps: &regex::Captures<'_>| {
            let key = &caps[2];
            match params.get(key) {
                Some(value) => {
                    used.push(key.to_string());
                    if &caps[1] == "*" {
                        value
                            .split('/')
                            .map(|seg| urlencoding::encode(seg).into_owned())
                            .collect::<Vec<_>>()
                            .join("/")
                    } else {
                        urlencoding::encode(value).into_owned()
                    }
                }
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });

        if let Some(param) = missing {
            return Err(RouteError::MissingParameter {
                route: name.to_string(),
                param,
            });
        }

        let query: Vec<String> = params
            .iter()
            .filter(|(k, _)| !used.iter().any(|u| u == *k))
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();

        if query.is_empty() {
            Ok(path.into_owned())
        } else {
            Ok(format!("{}?{}", path, query.join("&")))
        }
    }

    /// 反查处理该请求的路由
    pub fn match_path(&self, method: &str, path: &str) -> Option<&RouteEntry> {
        self.matchers
            .iter()
            .map(|m| (&m.regex, &self.entries[m.index]))
            .find(|(regex, entry)| {
                regex.is_match(path)
                    && entry.methods.iter().any(|m| {
                        m.eq_ignore_ascii_case(method)
                            || (m == "GET" && method.eq_ignore_ascii_case("HEAD"))
                    })
            })
            .map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, path: &str, methods: &[&str]) -> RouteEntry {
        RouteEntry {
            name: name.to_string(),
            path: path.to_string(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            controller: "test".to_string(),
        }
    }

    fn table() -> RouteTable {
        RouteTable::new(vec![
            entry("game_index", "/games", &["GET"]),
            entry("game_show", "/games/{id}", &["GET"]),
            entry("game_new", "/games/new", &["GET", "POST"]),
            entry("files", "/files/{*path}", &["GET"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_placeholder_pattern_is_compiled_once() {
        assert!(std::ptr::eq(placeholder_pattern(), placeholder_pattern()));
    }

    #[test]
    fn test_url_for_substitutes_and_appends_query() {
        let table = table();
        let params = BTreeMap::from([
            ("id".to_string(), "42".to_string()),
            ("tab".to_string(), "a b".to_string()),
        ]);
        assert_eq!(table.url_for("game_show", &params).unwrap(), "/games/42?tab=a%20b");
        assert_eq!(table.url_for("game_index", &BTreeMap::new()).unwrap(), "/games");
    }

    #[test]
    fn test_url_for_errors() {
        let table = table();
        assert_eq!(
            table.url_for("missing", &BTreeMap::new()),
            Err(RouteError::UnknownRoute("missing".to_string()))
        );
        assert_eq!(
            table.url_for("game_show", &BTreeMap::new()),
            Err(RouteError::MissingParameter {
                route: "game_show".to_string(),
                param: "id".to_string()
            })
        );
    }

    #[test]
    fn test_wildcard_keeps_slashes() {
        let table = table();
        let params = BTreeMap::from([("path".to_string(), "css/app.css".to_string())]);
        assert_eq!(table.url_for("files", &params).unwrap(), "/files/css/app.css");
    }

    #[test]
    fn test_match_prefers_static_segments() {
        let table = table();
        assert_eq!(table.match_path("GET", "/games/new").unwrap().name, "game_new");
        assert_eq!(table.match_path("GET", "/games/7").unwrap().name, "game_show");
        assert_eq!(table.match_path("HEAD", "/games").unwrap().name, "game_index");
        assert!(table.match_path("DELETE", "/games/7").is_none());
        assert!(table.match_path("GET", "/unknown").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = RouteTable::new(vec![
            entry("home", "/", &["GET"]),
            entry("home", "/index", &["GET"]),
        ]);
        assert_eq!(result.unwrap_err(), RouteError::DuplicateName("home".to_string()));
    }
}
