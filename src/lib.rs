//! Framefox：面向 CRUD 应用的 MVC Web 框架
//!
//! 控制器与具名路由、模板、SQLite ORM 与迁移、表单、防火墙式安全层、
//! 请求级 profiler，以及生成代码与管理数据库的命令行。

pub mod cli;
pub mod common;
pub mod error;
pub mod form;
pub mod kernel;
pub mod model;
pub mod orm;
pub mod profiler;
pub mod routing;
pub mod security;
pub mod templating;

pub use error::FrameworkError;
pub use kernel::{AppState, Application, ApplicationBuilder};
pub use model::config::Config;
