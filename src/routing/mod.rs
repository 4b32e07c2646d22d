//! 路由层
//!
//! 控制器注册具名路由，路由表负责 URL 生成与反查

mod controller;
mod table;

pub use controller::{Controller, Routes};
pub use table::{RouteEntry, RouteError, RouteTable};
