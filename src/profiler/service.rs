//! Profiler 服务
//!
//! 持有采集器与存储，由中间件在请求结束后调用

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use super::collector::{CollectContext, Collector, default_collectors};
use super::model::Profile;
use super::store::ProfileStore;
use crate::model::config::ProfilerConfig;
use crate::routing::RouteTable;

/// profiler 自身的路径前缀（永不采集）
pub const PROFILER_PREFIX: &str = "/_profiler";

pub struct Profiler {
    store: ProfileStore,
    collectors: Vec<Box<dyn Collector>>,
    exclude_paths: Vec<String>,
    routes: Arc<RouteTable>,
}

impl Profiler {
    /// 按配置创建（配置了 `storage` 时需在 tokio 运行时内调用）
    pub fn new(config: &ProfilerConfig, routes: Arc<RouteTable>) -> Result<Self> {
        Ok(Self {
            store: ProfileStore::new(config.max_profiles, config.storage.as_deref())?,
            collectors: default_collectors(),
            exclude_paths: config.exclude_paths.clone(),
            routes,
        })
    }

    /// 注册自定义采集器（同名时替换内置采集器）
    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.collectors.retain(|c| c.name() != collector.name());
        self.collectors.push(collector);
        self
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn panel_names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// 路径是否不需要采集
    pub fn is_excluded(&self, path: &str) -> bool {
        is_under(path, PROFILER_PREFIX) || self.exclude_paths.iter().any(|prefix| is_under(path, prefix))
    }

    /// 运行全部采集器并组装 profile
    pub fn build_profile(&self, ctx: &CollectContext<'_>) -> Profile {
        let mut panels = BTreeMap::new();
        for collector in &self.collectors {
            panels.insert(collector.name().to_string(), collector.collect(ctx));
        }
        Profile {
            token: ctx.token.to_string(),
            method: ctx.request.method.clone(),
            url: ctx.request.url.clone(),
            path: ctx.request.path.clone(),
            route: ctx.route.map(|r| r.name.clone()),
            status_code: ctx.response.status,
            ip: ctx.request.ip.clone(),
            duration_ms: ctx.duration_ms(),
            timestamp: ctx.started_at.to_rfc3339(),
            panels,
        }
    }
}

/// 前缀按路径段匹配（`/static` 匹配 `/static/app.css`，不匹配 `/statics`）
fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_paths() {
        let profiler = Profiler::new(&ProfilerConfig::default(), Arc::new(RouteTable::default())).unwrap();
        assert!(profiler.is_excluded("/_profiler"));
        assert!(profiler.is_excluded("/_profiler/abc/request"));
        assert!(profiler.is_excluded("/static/app.css"));
        assert!(profiler.is_excluded("/favicon.ico"));
        assert!(!profiler.is_excluded("/statics"));
        assert!(!profiler.is_excluded("/games"));
    }

    #[test]
    fn test_custom_collector_replaces_builtin() {
        struct Fixed;
        impl Collector for Fixed {
            fn name(&self) -> &str {
                "memory"
            }
            fn collect(&self, _ctx: &CollectContext<'_>) -> serde_json::Value {
                serde_json::json!({"fixed": true})
            }
        }
        let profiler = Profiler::new(&ProfilerConfig::default(), Arc::new(RouteTable::default()))
            .unwrap()
            .with_collector(Box::new(Fixed));
        let names = profiler.panel_names();
        assert_eq!(names.len(), 7);
        assert_eq!(names.last(), Some(&"memory"));
    }
}
