//! 分层的全链路追踪ID
//!
//! 在三种执行边界上生成、校验和传递追踪ID：入站请求、定时任务、线程池任务交接。
//! 追踪ID是由片段组成的不透明字符串，每跨过一个边界就追加一个新片段，且只能追加、不能替换。
//! 核心功能与Web框架无关，并为Axum提供了开箱即用的中间件支持。
//!
//! ## Usage
//!
//! ### 基础用法：解析和读取追踪ID
//! ```
//! use trace_chain::{context, Boundary, TraceContext, TraceResolver};
//!
//! let resolver = TraceResolver::default();
//! let mut ctx = TraceContext::new();
//!
//! // 扩展入站请求带来的追踪ID
//! let trace_id = resolver
//!     .resolve(&mut ctx, Boundary::Request { inbound: Some("root123") })
//!     .unwrap();
//! assert!(trace_id.as_str().starts_with("root123_"));
//!
//! // 在执行单元的作用域内随处读取
//! context::sync_with_context(ctx, || {
//!     assert_eq!(context::get_trace_id(), Some(trace_id.clone()));
//! });
//! ```
//!
//! ### 定时任务
//! ```
//! use std::sync::Arc;
//! use trace_chain::{context, JobRunner, TraceResolver};
//!
//! let resolver = Arc::new(TraceResolver::default());
//! let runner = JobRunner::new(Arc::clone(&resolver));
//!
//! runner.run("nightly-cleanup", || {
//!     let trace_id = context::get_trace_id().unwrap();
//!     tracing::info!(%trace_id, "cleaning up");
//!     Ok::<_, std::io::Error>(())
//! });
//! ```
//!
//! ### Axum 集成（需要启用 axum feature）
//! ```ignore
//! use axum::{routing::get, Router};
//! use trace_chain::{TraceId, TraceIdLayer};
//!
//! async fn handler(trace_id: TraceId) -> String {
//!     // 直接在函数签名中获取 TraceId
//!     format!("Hello! Your trace ID is: {}", trace_id)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(TraceIdLayer::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod config;
pub mod context;
mod error;
mod generator;
mod handoff;
mod job;
mod request;
mod resolver;
mod trace_id;

pub use config::{
    AdditionalHeader, GeneratorConfig, InvokerSettings, InvokerType, TraceConfig, TraceSettings,
};
pub use context::{get_trace_id, with_context, ContextGuard, TraceContext};
pub use error::{Result, TraceError};
pub use generator::IdGenerator;
pub use handoff::{ContextSnapshot, Executor, Task, TracingExecutor};
pub use job::JobRunner;
pub use request::{begin_request, RequestTrace};
pub use resolver::{Boundary, TraceResolver};
pub use trace_id::{TraceId, MAX_INBOUND_LEN};

/// HTTP 头部中的追踪ID字段名
pub const TRACE_ID_HEADER: &str = "x-trace-id";

// -- axum feature --
#[cfg(feature = "axum")]
mod integrations;
#[cfg(feature = "axum")]
pub use integrations::axum::{LayerOptions, TraceIdLayer, TraceIdService};
