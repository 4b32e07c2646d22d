//! 控制器与路由注册

use std::collections::{BTreeMap, HashMap};

use axum::{
    Router,
    handler::Handler,
    http::Method,
    routing::{MethodFilter, MethodRouter},
};

use super::table::{RouteEntry, RouteError};
use crate::kernel::AppState;

/// 控制器
///
/// 控制器在 `routes` 中把处理函数注册为具名路由：
///
/// ```ignore
/// impl Controller for GameController {
///     fn routes(&self, routes: &mut Routes<AppState>) {
///         routes
///             .get("/games", "game_index", index)
///             .get("/games/{id}", "game_show", show);
///     }
/// }
/// ```
pub trait Controller: Send + Sync + 'static {
    /// 控制器名称（`debug router` 与 profiler 展示用）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("controller")
    }

    fn routes(&self, routes: &mut Routes<AppState>);
}

/// 路由收集器
///
/// 同一路径上的多个方法合并为一个 `MethodRouter`
pub struct Routes<S> {
    controller: String,
    methods: BTreeMap<String, MethodRouter<S>>,
    /// (METHOD, path) -> 路由名
    claimed: HashMap<(String, String), String>,
    entries: Vec<RouteEntry>,
    errors: Vec<RouteError>,
}

impl<S> Default for Routes<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    Some(match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::PATCH => MethodFilter::PATCH,
        Method::DELETE => MethodFilter::DELETE,
        Method::HEAD => MethodFilter::HEAD,
        Method::OPTIONS => MethodFilter::OPTIONS,
        _ => return None,
    })
}

impl<S> Routes<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            controller: String::new(),
            methods: BTreeMap::new(),
            claimed: HashMap::new(),
            entries: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// 设置后续注册路由所属的控制器
    pub fn set_controller(&mut self, name: impl Into<String>) {
        self.controller = name.into();
    }

    pub fn get<H, T>(&mut self, path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.route(&[Method::GET], path, name, handler)
    }

    pub fn post<H, T>(&mut self, path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.route(&[Method::POST], path, name, handler)
    }

    pub fn put<H, T>(&mut self, path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.route(&[Method::PUT], path, name, handler)
    }

    pub fn patch<H, T>(&mut self, path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.route(&[Method::PATCH], path, name, handler)
    }

    pub fn delete<H, T>(&mut self, path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        self.route(&[Method::DELETE], path, name, handler)
    }

    /// 以多个方法注册同一处理函数（如表单页 GET + POST）
    pub fn route<H, T>(&mut self, methods: &[Method], path: &str, name: &str, handler: H) -> &mut Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        let mut filter: Option<MethodFilter> = None;
        let mut method_names = Vec::with_capacity(methods.len());

        for method in methods {
            let Some(f) = method_filter(method) else {
                tracing::warn!("路由 {} 使用了不支持的方法 {}，已忽略", name, method);
                continue;
            };
            let key = (method.as_str().to_string(), path.to_string());
            if let Some(existing) = self.claimed.get(&key) {
                self.errors.push(RouteError::DuplicateMethod {
                    method: method.as_str().to_string(),
                    path: path.to_string(),
                    existing: existing.clone(),
                });
                continue;
            }
            self.claimed.insert(key, name.to_string());
            method_names.push(method.as_str().to_string());
            filter = Some(match filter {
                Some(prev) => prev.or(f),
                None => f,
            });
        }

        let Some(filter) = filter else {
            return self;
        };

        let router = self
            .methods
            .remove(path)
            .unwrap_or_default()
            .on(filter, handler);
        self.methods.insert(path.to_string(), router);

        self.entries.push(RouteEntry {
            name: name.to_string(),
            path: path.to_string(),
            methods: method_names,
            controller: self.controller.clone(),
        });
        self
    }

    /// 已收集的路由条目
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// 生成 axum Router 与路由条目
    ///
    /// 注册过程中出现的冲突在此处统一报告
    pub fn into_parts(self) -> Result<(Router<S>, Vec<RouteEntry>), RouteError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        let router = self
            .methods
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods));
        Ok((router, self.entries))
    }
}
