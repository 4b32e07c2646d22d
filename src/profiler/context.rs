//! 请求级采集上下文
//!
//! profiler 中间件为每个请求建立 task-local 的 [`ProfileContext`]，
//! ORM、安全层、日志层在同一任务中把数据写入当前上下文；
//! 不在请求任务中（CLI、后台任务）时所有记录函数都是空操作。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::common::truncate_with_ellipsis;
use crate::error::ErrorReport;
use crate::orm::SqlValue;

/// 单条 SQL 参数最多保留的字节数
const MAX_PARAM_BYTES: usize = 256;
/// 每个请求最多保留的日志条数
const MAX_LOGS_PER_REQUEST: usize = 500;

tokio::task_local! {
    static CURRENT: Arc<ProfileContext>;
}

/// SQL 查询记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub sql: String,
    pub params: Vec<String>,
    pub duration_ms: f64,
    /// 相对请求开始的偏移
    pub offset_ms: f64,
}

/// 日志记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: String,
    pub target: String,
    pub message: String,
    pub offset_ms: f64,
}

/// 认证状态快照
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySnapshot {
    pub authenticated: bool,
    pub user: Option<String>,
    pub roles: Vec<String>,
    pub firewall: Option<String>,
    pub authenticator: Option<String>,
    /// 访问控制决定（granted / denied）
    pub decision: Option<String>,
}

/// 计时检查点
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub name: String,
    pub offset_ms: f64,
}

/// 请求期间采集到的数据
#[derive(Debug, Clone, Default, Serialize)]
pub struct Captured {
    pub queries: Vec<QueryRecord>,
    pub logs: Vec<LogRecord>,
    pub dropped_logs: usize,
    pub exception: Option<ErrorReport>,
    pub security: Option<SecuritySnapshot>,
    pub checkpoints: Vec<Checkpoint>,
}

/// 单个请求的采集上下文
pub struct ProfileContext {
    token: String,
    started: Instant,
    captured: Mutex<Captured>,
}

impl ProfileContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            started: Instant::now(),
            captured: Mutex::new(Captured::default()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn offset_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// 取出当前已采集数据的副本
    pub fn snapshot(&self) -> Captured {
        self.captured.lock().clone()
    }
}

/// 在给定上下文中运行 future
pub async fn scope<F: Future>(ctx: Arc<ProfileContext>, f: F) -> F::Output {
    CURRENT.scope(ctx, f).await
}

/// 当前请求的上下文（不在请求任务中时返回 None）
pub fn current() -> Option<Arc<ProfileContext>> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

fn with_current(f: impl FnOnce(&ProfileContext)) {
    let _ = CURRENT.try_with(|ctx| f(ctx));
}

fn display_param(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(r) => r.to_string(),
        SqlValue::Text(t) => format!("'{}'", truncate_with_ellipsis(t, MAX_PARAM_BYTES)),
        SqlValue::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

pub fn record_query(sql: &str, params: &[SqlValue], duration: Duration) {
    with_current(|ctx| {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let record = QueryRecord {
            sql: sql.trim().to_string(),
            params: params.iter().map(display_param).collect(),
            duration_ms,
            offset_ms: (ctx.offset_ms() - duration_ms).max(0.0),
        };
        ctx.captured.lock().queries.push(record);
    });
}

pub fn record_log(level: &str, target: &str, message: String) {
    with_current(|ctx| {
        let offset_ms = ctx.offset_ms();
        let mut captured = ctx.captured.lock();
        if captured.logs.len() >= MAX_LOGS_PER_REQUEST {
            captured.dropped_logs += 1;
            return;
        }
        captured.logs.push(LogRecord {
            level: level.to_string(),
            target: target.to_string(),
            message,
            offset_ms,
        });
    });
}

pub fn record_exception(report: &ErrorReport) {
    with_current(|ctx| {
        ctx.captured.lock().exception = Some(report.clone());
    });
}

pub fn record_security(snapshot: SecuritySnapshot) {
    with_current(|ctx| {
        ctx.captured.lock().security = Some(snapshot);
    });
}

/// 更新访问控制决定（保留已记录的用户信息）
pub fn record_access_decision(decision: &str) {
    with_current(|ctx| {
        let mut captured = ctx.captured.lock();
        captured
            .security
            .get_or_insert_with(SecuritySnapshot::default)
            .decision = Some(decision.to_string());
    });
}

/// 记录命名计时点（处理器中可调用以细分耗时）
pub fn checkpoint(name: &str) {
    with_current(|ctx| {
        let offset_ms = ctx.offset_ms();
        ctx.captured.lock().checkpoints.push(Checkpoint {
            name: name.to_string(),
            offset_ms,
        });
    });
}
