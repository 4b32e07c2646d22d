//! 请求级 Profiler
//!
//! 按 token 记录每个请求的计时、SQL、内存、异常、认证与日志，并提供调试界面

pub mod collector;
pub mod context;
pub mod middleware;
pub mod model;
mod capture;
mod handlers;
mod router;
mod service;
mod store;
mod types;

pub use capture::ProfilerLayer;
pub use collector::{CollectContext, Collector};
pub use middleware::profiler_middleware;
pub use model::{Profile, ProfileSummary};
pub use router::create_profiler_router;
pub use service::Profiler;
pub use store::ProfileStore;
pub use types::{ProfileListResponse, ProfileQuery};
