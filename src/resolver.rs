//! 执行边界的追踪ID解析
//!
//! 三种边界各有自己的规则：
//! - 请求边界：扩展入站请求头中的追踪ID（如果有），对上下文状态没有前置条件
//! - 定时任务边界：根调用者，上下文必须为空，从不继承父ID
//! - 线程交接边界：扩展提交时捕获并在执行端安装的追踪ID

use crate::config::{InvokerType, TraceConfig};
use crate::context::{self, TraceContext};
use crate::error::{Result, TraceError};
use crate::generator::IdGenerator;
use crate::trace_id::TraceId;

/// 执行边界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary<'a> {
    /// 入站请求，`inbound` 为请求头中的原始值
    Request { inbound: Option<&'a str> },
    /// 定时任务
    Job,
    /// 线程池任务，父ID取自已安装的快照
    Handoff,
}

impl Boundary<'_> {
    pub fn invoker(&self) -> InvokerType {
        match self {
            Self::Request { .. } => InvokerType::Request,
            Self::Job => InvokerType::Job,
            Self::Handoff => InvokerType::Thread,
        }
    }
}

/// 追踪ID解析器
///
/// 持有每种调用者的生成器，进程范围内只读共享。
#[derive(Debug, Clone)]
pub struct TraceResolver {
    request: IdGenerator,
    job: IdGenerator,
    thread: IdGenerator,
}

impl TraceResolver {
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            request: IdGenerator::new(config.generator(InvokerType::Request).clone()),
            job: IdGenerator::new(config.generator(InvokerType::Job).clone()),
            thread: IdGenerator::new(config.generator(InvokerType::Thread).clone()),
        }
    }

    pub fn generator(&self, invoker: InvokerType) -> &IdGenerator {
        match invoker {
            InvokerType::Request => &self.request,
            InvokerType::Job => &self.job,
            InvokerType::Thread => &self.thread,
        }
    }

    /// 为执行单元生成新的追踪ID并写入上下文
    ///
    /// # 错误
    /// - 定时任务边界遇到已有追踪ID的上下文时返回 [`TraceError::InvalidState`]
    /// - 新ID不是上下文中现有ID的扩展时返回 [`TraceError::InvalidState`]
    pub fn resolve(&self, ctx: &mut TraceContext, boundary: Boundary<'_>) -> Result<TraceId> {
        let trace_id = match boundary {
            Boundary::Request { inbound } => {
                let parent = inbound.and_then(|raw| {
                    let parsed = TraceId::parse_inbound(raw);
                    if parsed.is_none() && !raw.trim().is_empty() {
                        tracing::warn!(
                            inbound_len = raw.len(),
                            "Discarding malformed inbound trace id, starting a new chain"
                        );
                    }
                    parsed
                });
                self.request.generate(parent.as_ref().map(TraceId::as_str))?
            }
            Boundary::Job => {
                if let Some(existing) = ctx.get() {
                    return Err(TraceError::invalid_state(format!(
                        "context already has trace id populated, this is illegal (existing: {existing})"
                    )));
                }
                self.job.generate(None)?
            }
            Boundary::Handoff => {
                let parent = ctx.get().map(|id| id.as_str().to_owned());
                self.thread.generate(parent.as_deref())?
            }
        };

        ctx.set(trace_id.clone())?;
        tracing::debug!(
            invoker = boundary.invoker().as_str(),
            trace_id = %trace_id,
            "Trace id resolved"
        );
        Ok(trace_id)
    }

    /// 在当前作用域的上下文上解析
    ///
    /// # 错误
    /// 不在追踪上下文作用域内时返回 [`TraceError::NoContext`]
    pub fn resolve_current(&self, boundary: Boundary<'_>) -> Result<TraceId> {
        context::with_current(|ctx| self.resolve(ctx, boundary))?
    }
}

impl Default for TraceResolver {
    fn default() -> Self {
        Self::new(&TraceConfig::default())
    }
}
