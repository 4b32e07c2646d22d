//! Profiler 中间件
//!
//! 为每个请求生成 token、建立采集上下文，结束后保存 profile 并注入调试工具条

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use super::collector::{CollectContext, MemorySample, RequestSnapshot, ResponseSnapshot};
use super::context::{self, ProfileContext};
use super::model::Profile;
use super::service::{PROFILER_PREFIX, Profiler};
use crate::common::{escape_html, random_hex};

pub const DEBUG_TOKEN_HEADER: &str = "x-debug-token";
pub const DEBUG_TOKEN_LINK_HEADER: &str = "x-debug-token-link";

/// 超过该大小的 HTML 不注入工具条
const MAX_INJECT_BODY: u64 = 4 * 1024 * 1024;

pub async fn profiler_middleware(
    State(profiler): State<Arc<Profiler>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if profiler.is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let token = random_hex(6);
    let ctx = Arc::new(ProfileContext::new(token.clone()));
    let request_snapshot = RequestSnapshot::capture(&request);
    let started_at = Utc::now();
    let memory_before = MemorySample::read();

    let response = context::scope(ctx.clone(), next.run(request)).await;

    let duration = ctx.elapsed();
    let memory_after = MemorySample::read();
    let (mut parts, body) = response.into_parts();
    let response_snapshot = ResponseSnapshot::capture(parts.status, &parts.headers);
    let captured = ctx.snapshot();
    let route = profiler
        .routes()
        .match_path(&request_snapshot.method, &request_snapshot.path);

    let profile = profiler.build_profile(&CollectContext {
        token: &token,
        request: &request_snapshot,
        response: &response_snapshot,
        route,
        captured: &captured,
        started_at,
        duration,
        memory_before,
        memory_after,
    });

    let link = format!("{}/{}", PROFILER_PREFIX, token);
    if let Ok(value) = HeaderValue::from_str(&token) {
        parts.headers.insert(DEBUG_TOKEN_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&link) {
        parts.headers.insert(DEBUG_TOKEN_LINK_HEADER, value);
    }

    let body = if should_inject(&parts.headers, &body) {
        match axum::body::to_bytes(body, MAX_INJECT_BODY as usize).await {
            Ok(bytes) => {
                parts.headers.remove(header::CONTENT_LENGTH);
                Body::from(inject_toolbar(&bytes, &toolbar_html(&profile, &link)))
            }
            Err(e) => {
                tracing::warn!("读取响应体失败，跳过工具条注入: {}", e);
                Body::empty()
            }
        }
    } else {
        body
    };

    tracing::debug!(
        token = %token,
        status = profile.status_code,
        duration_ms = profile.duration_ms,
        "{} {}",
        profile.method,
        profile.path
    );
    profiler.store().record(profile);

    Response::from_parts(parts, body)
}

fn should_inject(headers: &http::HeaderMap, body: &Body) -> bool {
    let is_html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/html"))
        .unwrap_or(false);
    if !is_html || headers.contains_key(header::CONTENT_ENCODING) {
        return false;
    }
    matches!(body.size_hint().upper(), Some(n) if n <= MAX_INJECT_BODY)
}

/// 在最后一个 `</body>` 前插入工具条，没有 `</body>` 时原样返回
pub fn inject_toolbar(html: &[u8], toolbar: &str) -> Vec<u8> {
    const CLOSING: &[u8] = b"</body>";
    let position = html
        .windows(CLOSING.len())
        .rposition(|w| w.eq_ignore_ascii_case(CLOSING));
    match position {
        Some(pos) => {
            let mut out = Vec::with_capacity(html.len() + toolbar.len());
            out.extend_from_slice(&html[..pos]);
            out.extend_from_slice(toolbar.as_bytes());
            out.extend_from_slice(&html[pos..]);
            out
        }
        None => html.to_vec(),
    }
}

fn toolbar_html(profile: &Profile, link: &str) -> String {
    let queries = profile
        .panels
        .get("database")
        .and_then(|p| p.get("count"))
        .and_then(|c| c.as_u64())
        .unwrap_or(0);
    let user = profile
        .panels
        .get("security")
        .and_then(|p| p.get("user"))
        .and_then(|u| u.as_str())
        .unwrap_or("anonymous");
    let status_color = if profile.status_code >= 500 {
        "#c0392b"
    } else if profile.status_code >= 400 {
        "#d68910"
    } else {
        "#229954"
    };
    format!(
        r#"<div id="framefox-toolbar" style="position:fixed;bottom:0;left:0;right:0;z-index:99999;display:flex;gap:16px;align-items:center;padding:6px 12px;background:#222;color:#eee;font:12px/1.4 monospace">
<a href="{link}" style="color:#fff;font-weight:bold;text-decoration:none">framefox</a>
<span style="background:{color};padding:1px 6px;border-radius:3px">{status}</span>
<span>{route}</span>
<span>{duration:.1} ms</span>
<span>{queries} queries</span>
<span>{user}</span>
<a href="{link}" style="color:#9cf;margin-left:auto">{token}</a>
</div>
"#,
        link = escape_html(link),
        color = status_color,
        status = profile.status_code,
        route = escape_html(profile.route.as_deref().unwrap_or("-")),
        duration = profile.duration_ms,
        queries = queries,
        user = escape_html(user),
        token = escape_html(&profile.token),
    )
}
