//! 框架错误类型与错误页
//!
//! 处理器返回 [`FrameworkError`]，转换为响应时携带 [`ErrorReport`] 扩展；
//! [`error_page_middleware`] 再按客户端类型渲染 JSON 或 HTML 错误页。

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::profiler::context as profile_context;
use crate::templating::TemplateRenderer;

/// 框架错误
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    /// 字段名 -> 错误消息
    #[error("Validation failed")]
    Validation(BTreeMap<String, Vec<String>>),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FrameworkError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "authentication_error",
            Self::Forbidden(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Validation(_) => "validation_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// 生成错误报告
    pub fn report(&self) -> ErrorReport {
        let chain = match self {
            Self::Internal(e) => e.chain().skip(1).map(|c| c.to_string()).collect(),
            _ => Vec::new(),
        };
        let fields = match self {
            Self::Validation(fields) => fields.clone(),
            _ => BTreeMap::new(),
        };
        ErrorReport {
            status: self.status_code().as_u16(),
            error_type: self.error_type().to_string(),
            message: self.to_string(),
            chain,
            fields,
        }
    }
}

impl From<rusqlite::Error> for FrameworkError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(e.into())
    }
}

impl From<minijinja::Error> for FrameworkError {
    fn from(e: minijinja::Error) -> Self {
        Self::Internal(e.into())
    }
}

/// 错误报告（响应扩展，也写入 profiler 的 exception 面板）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    /// 根因链（仅调试模式展示）
    pub chain: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ErrorReport {
    /// 根据状态码构造通用报告（用于提取器拒绝、body 限制等非框架错误）
    pub fn from_status(status: StatusCode, message: Option<String>) -> Self {
        let error_type = match status {
            StatusCode::PAYLOAD_TOO_LARGE => "payload_too_large",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
            StatusCode::UNPROCESSABLE_ENTITY => "validation_error",
            StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
            StatusCode::NOT_FOUND => "not_found",
            s if s.is_server_error() => "internal_error",
            _ => "bad_request",
        };
        Self {
            status: status.as_u16(),
            error_type: error_type.to_string(),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error").to_string()),
            chain: Vec::new(),
            fields: BTreeMap::new(),
        }
    }
}

/// JSON 错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                error_type: error_type.into(),
                message: message.into(),
                fields: BTreeMap::new(),
            },
        }
    }
}

impl IntoResponse for FrameworkError {
    fn into_response(self) -> Response {
        let report = self.report();
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                error_type: report.error_type.clone(),
                message: public_message(&report, status),
                fields: report.fields.clone(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

fn public_message(report: &ErrorReport, status: StatusCode) -> String {
    if status.is_server_error() {
        "Internal server error".to_string()
    } else {
        report.message.clone()
    }
}

/// 错误页中间件状态
#[derive(Clone)]
pub struct ErrorPages {
    pub debug: bool,
    pub templates: Arc<TemplateRenderer>,
}

const ERROR_TEMPLATE: &str = include_str!("../assets/errors/error.html");

/// 错误页中间件
///
/// 将 4xx/5xx 响应统一渲染为 JSON 或 HTML，并记录到 profiler
pub async fn error_page_middleware(
    State(pages): State<ErrorPages>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let wants_json = wants_json(request.headers(), request.uri().path());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let report = match response.extensions().get::<ErrorReport>() {
        Some(report) => report.clone(),
        None => {
            // 已经渲染过的页面（模板错误页、JSON 认证错误等）保持原样
            if has_rendered_body(response.headers()) {
                return response;
            }
            let (parts, body) = response.into_parts();
            let text = axum::body::to_bytes(body, 64 * 1024)
                .await
                .ok()
                .map(|b| String::from_utf8_lossy(&b).into_owned());
            let report = ErrorReport::from_status(parts.status, text);
            return render(&pages, report, wants_json, parts.headers, &method, &path);
        }
    };

    let (parts, _) = response.into_parts();
    render(&pages, report, wants_json, parts.headers, &method, &path)
}

fn render(
    pages: &ErrorPages,
    report: ErrorReport,
    wants_json: bool,
    original_headers: HeaderMap,
    method: &http::Method,
    path: &str,
) -> Response {
    let status = StatusCode::from_u16(report.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(%method, path, "请求处理失败: {} {:?}", report.message, report.chain);
    } else {
        tracing::debug!(%method, path, status = status.as_u16(), "{}", report.message);
    }
    profile_context::record_exception(&report);

    let mut response = if wants_json {
        let mut body = ErrorResponse::new(report.error_type.clone(), public_message(&report, status));
        if pages.debug && status.is_server_error() {
            body.error.message = report.message.clone();
        }
        body.error.fields = report.fields.clone();
        (status, Json(body)).into_response()
    } else {
        let context = serde_json::json!({
            "status": report.status,
            "reason": status.canonical_reason().unwrap_or("Error"),
            "type": report.error_type,
            "message": if pages.debug || !status.is_server_error() { report.message.clone() } else { public_message(&report, status) },
            "chain": if pages.debug { report.chain.clone() } else { Vec::new() },
            "fields": report.fields,
            "debug": pages.debug,
            "method": method.as_str(),
            "path": path,
        });
        let html = pages
            .templates
            .render_str(ERROR_TEMPLATE, &context)
            .unwrap_or_else(|e| {
                tracing::error!("渲染错误页失败: {}", e);
                format!("<h1>{} {}</h1>", report.status, status.canonical_reason().unwrap_or("Error"))
            });
        (status, Html(html)).into_response()
    };

    // 保留认证相关的响应头（WWW-Authenticate 等）
    for (name, value) in original_headers.iter() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }
    response.extensions_mut().insert(report);
    response
}

fn wants_json(headers: &HeaderMap, path: &str) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    accept.contains("application/json") || path.starts_with("/api/") || path == "/api"
}

fn has_rendered_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/html") || ct.starts_with("application/json"))
        .unwrap_or(false)
}
