//! 面板采集器
//!
//! 每个采集器把请求结束时的上下文转换为一个 JSON 面板

use std::collections::BTreeMap;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Request};
use serde_json::{Value, json};

use super::context::Captured;
use crate::common::parse_urlencoded;
use crate::routing::RouteEntry;

/// 需要脱敏的请求/响应头
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

const MASK: &str = "******";

/// 请求快照（在调用下游之前截取）
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    pub ip: Option<String>,
}

impl RequestSnapshot {
    pub fn capture(request: &Request<Body>) -> Self {
        let uri = request.uri();
        let host = request
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let query = uri
            .query()
            .map(|q| parse_urlencoded(q).into_iter().collect())
            .unwrap_or_default();
        let ip = request
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Self {
            method: request.method().to_string(),
            url: format!("http://{}{}", host, path_and_query),
            path: uri.path().to_string(),
            query,
            headers: masked_headers(request.headers()),
            ip,
        }
    }
}

/// 响应快照
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseSnapshot {
    pub fn capture(status: http::StatusCode, headers: &HeaderMap) -> Self {
        Self {
            status: status.as_u16(),
            headers: masked_headers(headers),
        }
    }
}

/// 复制头部并隐藏敏感值
pub fn masked_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                MASK.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name, value)
        })
        .collect()
}

/// 进程内存读数（字节）
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySample {
    pub rss: Option<u64>,
    pub peak: Option<u64>,
}

impl MemorySample {
    /// 读取 `/proc/self`（非 Linux 平台返回空读数）
    pub fn read() -> Self {
        Self {
            rss: read_rss(),
            peak: read_peak(),
        }
    }
}

const PAGE_SIZE: u64 = 4096;

fn read_rss() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * PAGE_SIZE)
}

fn read_peak() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// 采集上下文
pub struct CollectContext<'a> {
    pub token: &'a str,
    pub request: &'a RequestSnapshot,
    pub response: &'a ResponseSnapshot,
    pub route: Option<&'a RouteEntry>,
    pub captured: &'a Captured,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub memory_before: MemorySample,
    pub memory_after: MemorySample,
}

impl CollectContext<'_> {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// 面板采集器
pub trait Collector: Send + Sync {
    /// 面板名（URL 中的 `{panel}`）
    fn name(&self) -> &str;

    fn collect(&self, ctx: &CollectContext<'_>) -> Value;
}

/// 内置采集器
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(RequestCollector),
        Box::new(TimeCollector),
        Box::new(DatabaseCollector),
        Box::new(MemoryCollector),
        Box::new(ExceptionCollector),
        Box::new(SecurityCollector),
        Box::new(LogCollector),
    ]
}

fn header_map(headers: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        match map.get_mut(name) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            _ => {
                map.insert(name.clone(), Value::String(value.clone()));
            }
        }
    }
    Value::Object(map)
}

pub struct RequestCollector;

impl Collector for RequestCollector {
    fn name(&self) -> &str {
        "request"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        json!({
            "method": ctx.request.method,
            "url": ctx.request.url,
            "path": ctx.request.path,
            "query": ctx.request.query,
            "headers": header_map(&ctx.request.headers),
            "ip": ctx.request.ip,
            "route": ctx.route.map(|r| json!({
                "name": r.name,
                "path": r.path,
                "methods": r.methods,
                "controller": r.controller,
            })),
            "response": {
                "status": ctx.response.status,
                "headers": header_map(&ctx.response.headers),
            },
        })
    }
}

pub struct TimeCollector;

impl Collector for TimeCollector {
    fn name(&self) -> &str {
        "time"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        let query_ms: f64 = ctx.captured.queries.iter().map(|q| q.duration_ms).sum();
        json!({
            "start": ctx.started_at.to_rfc3339(),
            "durationMs": ctx.duration_ms(),
            "databaseMs": query_ms,
            "checkpoints": ctx.captured.checkpoints,
        })
    }
}

pub struct DatabaseCollector;

impl Collector for DatabaseCollector {
    fn name(&self) -> &str {
        "database"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        let queries = &ctx.captured.queries;
        let total_ms: f64 = queries.iter().map(|q| q.duration_ms).sum();
        json!({
            "count": queries.len(),
            "totalMs": total_ms,
            "queries": queries,
        })
    }
}

pub struct MemoryCollector;

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        let delta = match (ctx.memory_before.rss, ctx.memory_after.rss) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        };
        let peak_delta = match (ctx.memory_before.peak, ctx.memory_after.peak) {
            (Some(before), Some(after)) => Some(after.saturating_sub(before)),
            _ => None,
        };
        json!({
            "before": ctx.memory_before.rss,
            "after": ctx.memory_after.rss,
            "delta": delta,
            "peak": ctx.memory_after.peak,
            "peakDelta": peak_delta,
        })
    }
}

pub struct ExceptionCollector;

impl Collector for ExceptionCollector {
    fn name(&self) -> &str {
        "exception"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        match &ctx.captured.exception {
            Some(report) => json!({
                "raised": true,
                "type": report.error_type,
                "message": report.message,
                "status": report.status,
                "chain": report.chain,
                "fields": report.fields,
            }),
            None => json!({ "raised": false }),
        }
    }
}

pub struct SecurityCollector;

impl Collector for SecurityCollector {
    fn name(&self) -> &str {
        "security"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        match &ctx.captured.security {
            Some(snapshot) => serde_json::to_value(snapshot).unwrap_or(Value::Null),
            None => json!({ "authenticated": false, "enabled": false }),
        }
    }
}

pub struct LogCollector;

impl Collector for LogCollector {
    fn name(&self) -> &str {
        "logs"
    }

    fn collect(&self, ctx: &CollectContext<'_>) -> Value {
        let mut by_level: BTreeMap<&str, usize> = BTreeMap::new();
        for log in &ctx.captured.logs {
            *by_level.entry(log.level.as_str()).or_default() += 1;
        }
        json!({
            "count": ctx.captured.logs.len(),
            "dropped": ctx.captured.dropped_logs,
            "byLevel": by_level,
            "records": ctx.captured.logs,
        })
    }
}
