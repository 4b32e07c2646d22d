//! tracing 日志捕获层
//!
//! 将请求处理期间产生的事件写入当前 profile 的 logs 面板

use std::fmt::Write as _;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::context;

/// 捕获层，注册到全局 subscriber 后对所有请求生效
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfilerLayer;

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for ProfilerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if context::current().is_none() {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        let mut message = visitor.message;
        message.push_str(&visitor.fields);
        context::record_log(metadata.level().as_str(), metadata.target(), message);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tracing_subscriber::prelude::*;

    use super::*;
    use crate::profiler::context::ProfileContext;

    #[tokio::test]
    async fn test_captures_events_inside_request() {
        let subscriber = tracing_subscriber::registry().with(ProfilerLayer);
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info!("outside");
        let ctx = Arc::new(ProfileContext::new("t"));
        context::scope(ctx.clone(), async {
            tracing::warn!(user = "fox", "login failed");
        })
        .await;

        let logs = ctx.snapshot().logs;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "WARN");
        assert_eq!(logs[0].message, "login failed user=fox");
    }
}
