//! Profiler API 处理器

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{Html, IntoResponse, Json, Response},
};
use rust_embed::RustEmbed;

use super::service::Profiler;
use super::types::ProfileQuery;
use crate::error::FrameworkError;

#[derive(RustEmbed)]
#[folder = "assets/profiler/"]
struct ProfilerAssets;

fn index_page() -> Result<Html<String>, FrameworkError> {
    let file = ProfilerAssets::get("index.html")
        .ok_or_else(|| FrameworkError::Internal(anyhow::anyhow!("缺少 profiler 页面资源")))?;
    Ok(Html(String::from_utf8_lossy(&file.data).into_owned()))
}

/// GET /_profiler
pub async fn index() -> Result<Html<String>, FrameworkError> {
    index_page()
}

/// GET /_profiler/{token}
pub async fn show(
    State(profiler): State<Arc<Profiler>>,
    Path(token): Path<String>,
) -> Result<Html<String>, FrameworkError> {
    if profiler.store().get(&token).await?.is_none() {
        return Err(FrameworkError::not_found(format!("Profile {} 不存在", token)));
    }
    index_page()
}

/// GET /_profiler/api/profiles
pub async fn list(
    State(profiler): State<Arc<Profiler>>,
    Query(query): Query<ProfileQuery>,
) -> Result<Response, FrameworkError> {
    let response = profiler.store().query(query).await.map_err(|e| {
        tracing::error!("查询 profile 失败: {}", e);
        FrameworkError::Internal(e)
    })?;
    Ok(Json(response).into_response())
}

/// DELETE /_profiler/api/profiles
pub async fn clear(State(profiler): State<Arc<Profiler>>) -> Result<Response, FrameworkError> {
    let count = profiler.store().clear().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("已清除 {} 条记录", count)
    }))
    .into_response())
}

/// GET /_profiler/api/profiles/{token}
pub async fn summary(
    State(profiler): State<Arc<Profiler>>,
    Path(token): Path<String>,
) -> Result<Response, FrameworkError> {
    let profile = profiler
        .store()
        .get(&token)
        .await?
        .ok_or_else(|| FrameworkError::not_found(format!("Profile {} 不存在", token)))?;
    Ok(Json(profile.summary()).into_response())
}

/// GET /_profiler/{token}/{panel}
pub async fn panel(
    State(profiler): State<Arc<Profiler>>,
    Path((token, panel)): Path<(String, String)>,
) -> Result<Response, FrameworkError> {
    let profile = profiler
        .store()
        .get(&token)
        .await?
        .ok_or_else(|| FrameworkError::not_found(format!("Profile {} 不存在", token)))?;
    let data = profile
        .panels
        .get(&panel)
        .ok_or_else(|| FrameworkError::not_found(format!("面板 {} 不存在", panel)))?;
    Ok(Json(data.clone()).into_response())
}

/// GET /_profiler/assets/{*path}
pub async fn asset(Path(path): Path<String>) -> Result<Response, FrameworkError> {
    let file = ProfilerAssets::get(&path)
        .ok_or_else(|| FrameworkError::not_found(format!("资源 {} 不存在", path)))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        file.data.into_owned(),
    )
        .into_response())
}
