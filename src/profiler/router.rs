//! Profiler 路由

use std::sync::Arc;

use axum::{Router, routing::get};

use super::handlers::{asset, clear, index, list, panel, show, summary};
use super::service::Profiler;

/// 创建 `/_profiler` 路由
///
/// 返回 Router<()>，可直接 merge 到主应用
pub fn create_profiler_router(profiler: Arc<Profiler>) -> Router {
    Router::new()
        .route("/_profiler", get(index))
        .route("/_profiler/api/profiles", get(list).delete(clear))
        .route("/_profiler/api/profiles/{token}", get(summary))
        .route("/_profiler/assets/{*path}", get(asset))
        .route("/_profiler/{token}", get(show))
        .route("/_profiler/{token}/{panel}", get(panel))
        .with_state(profiler)
}
