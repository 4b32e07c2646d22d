//! 模板渲染
//!
//! 封装 minijinja：从模板目录加载文件，`.html` 自动转义，注册 `url_for` 等全局函数

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::response::Html;
use minijinja::value::{Kwargs, Value};
use minijinja::{Environment, ErrorKind};
use serde::Serialize;

use crate::error::FrameworkError;
use crate::routing::RouteTable;

/// 模板渲染器
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// 创建渲染器
    ///
    /// `template_dir` 不存在时仅能渲染内联模板
    pub fn new(template_dir: impl AsRef<Path>, routes: Arc<RouteTable>) -> Self {
        let mut env = Environment::new();
        let dir = template_dir.as_ref();
        if dir.is_dir() {
            env.set_loader(minijinja::path_loader(dir));
        } else {
            tracing::debug!("模板目录不存在: {}", dir.display());
        }

        env.add_function("url_for", move |name: String, kwargs: Kwargs| {
            let mut params = BTreeMap::new();
            for key in kwargs.args() {
                let value: Value = kwargs.get(key)?;
                let rendered = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                params.insert(key.to_string(), rendered);
            }
            kwargs.assert_all_used()?;
            routes
                .url_for(&name, &params)
                .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
        });
        env.add_filter("truncate", truncate);
        env.add_filter("json", |value: Value| -> Result<String, minijinja::Error> {
            serde_json::to_string_pretty(&value)
                .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
        });

        Self { env }
    }

    /// 渲染模板目录中的文件
    pub fn render<C: Serialize>(&self, name: &str, context: C) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(context)
    }

    /// 渲染为 HTML 响应（供处理器直接返回）
    pub fn render_html<C: Serialize>(&self, name: &str, context: C) -> Result<Html<String>, FrameworkError> {
        Ok(Html(self.render(name, context)?))
    }

    /// 渲染内联 HTML 模板（自动转义）
    pub fn render_str<C: Serialize>(&self, source: &str, context: C) -> Result<String, minijinja::Error> {
        self.render_named_str("inline.html", source, context)
    }

    /// 渲染内联模板，按 `name` 的扩展名决定是否转义
    ///
    /// 代码生成器使用 `.rs`/`.yaml` 名称，不做 HTML 转义
    pub fn render_named_str<C: Serialize>(
        &self,
        name: &str,
        source: &str,
        context: C,
    ) -> Result<String, minijinja::Error> {
        self.env.render_named_str(name, source, context)
    }
}

/// 按字符截断，超出时以 `...` 结尾（总长度不超过 `length`）
fn truncate(value: String, length: Option<usize>) -> String {
    let length = length.unwrap_or(255);
    if value.chars().count() <= length {
        return value;
    }
    let kept: String = value.chars().take(length.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
