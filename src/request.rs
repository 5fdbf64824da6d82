//! 请求边界适配（与Web框架无关）
//!
//! 框架集成只需要提供一个按名称读取请求头的函数，其余步骤在这里完成：
//! 复制附加请求头、解析追踪ID、在独立的上下文中执行处理器并在所有退出路径上清空上下文。

use crate::config::TraceConfig;
use crate::context::{self, ContextGuard, TraceContext};
use crate::error::Result;
use crate::resolver::{Boundary, TraceResolver};
use crate::trace_id::TraceId;
use std::future::Future;

/// 已解析的请求追踪状态
#[derive(Debug, Clone)]
pub struct RequestTrace {
    context: TraceContext,
    trace_id: TraceId,
}

impl RequestTrace {
    /// 本次请求的追踪ID，用于写入响应头
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// 在本次请求的上下文中执行处理器
    ///
    /// 处理器返回、出错、panic或被取消时都会清空上下文。
    pub async fn scope<F>(self, handler: F) -> F::Output
    where
        F: Future,
    {
        context::with_context(self.context, async move {
            let _guard = ContextGuard::new();
            handler.await
        })
        .await
    }

    /// 同步版本的 [`RequestTrace::scope`]
    pub fn scope_sync<F, T>(self, handler: F) -> T
    where
        F: FnOnce() -> T,
    {
        context::sync_with_context(self.context, || {
            let _guard = ContextGuard::new();
            handler()
        })
    }
}

/// 在请求到达时解析追踪ID
///
/// # 参数
/// * `resolver` - 追踪ID解析器
/// * `config` - 提供追踪ID请求头名称和附加请求头列表
/// * `header` - 按名称读取请求头的值
pub fn begin_request<'h, F>(resolver: &TraceResolver, config: &TraceConfig, header: F) -> Result<RequestTrace>
where
    F: Fn(&str) -> Option<&'h str>,
{
    let mut context = TraceContext::new();
    for additional in config.additional_headers() {
        if let Some(value) = header(&additional.header_name) {
            context.put(additional.context_key.as_str(), value);
        }
    }

    let inbound = header(config.header_name());
    let trace_id = resolver.resolve(&mut context, Boundary::Request { inbound })?;
    Ok(RequestTrace { context, trace_id })
}
