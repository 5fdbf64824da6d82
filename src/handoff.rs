//! 线程交接：提交时捕获上下文，执行时安装并扩展
//!
//! 提交端调用 [`ContextSnapshot::capture`] 得到不可变快照；执行端（可能是被复用的池化线程）
//! 用 [`ContextSnapshot::run`] 把快照安装为全新的上下文，追加一个子片段，执行工作，
//! 最后无论成功、出错还是panic都清空上下文再把线程还给线程池。
//!
//! 除追踪上下文外，快照还会捕获提交端当前的 `tracing` span，在执行端重新进入，
//! 使日志保持在同一个span层级下。

use crate::context::{self, ContextGuard, TraceContext};
use crate::error::{Result, TraceError};
use crate::resolver::{Boundary, TraceResolver};
use crate::trace_id::TraceId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// 提交到线程池的工作单元
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 池化执行接口
pub trait Executor {
    /// 提交一个工作单元，不等待其完成
    fn execute(&self, task: Task);
}

/// 使用Tokio的阻塞线程池执行
impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Task) {
        drop(self.spawn_blocking(task));
    }
}

/// 提交时捕获的上下文快照
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    context: TraceContext,
    span: tracing::Span,
}

impl ContextSnapshot {
    /// 捕获当前执行单元的追踪上下文和 `tracing` span
    ///
    /// 不在作用域内时捕获空上下文，执行端将开启新的调用链。
    pub fn capture() -> Self {
        Self {
            context: context::snapshot().unwrap_or_default(),
            span: tracing::Span::current(),
        }
    }

    /// 从给定的上下文构造快照
    pub fn from_context(context: TraceContext) -> Self {
        Self {
            context,
            span: tracing::Span::current(),
        }
    }

    /// 捕获时的追踪ID
    pub fn trace_id(&self) -> Option<&TraceId> {
        self.context.get()
    }

    pub fn auxiliary(&self) -> &HashMap<String, String> {
        self.context.auxiliary()
    }

    /// 在执行端安装快照并执行工作
    ///
    /// # 错误
    /// 无法为本次交接解析追踪ID时返回错误，此时工作不会执行
    pub fn run<F, T>(self, resolver: &TraceResolver, work: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let Self { context, span } = self;
        let _entered = span.enter();
        // 安装的是全新的上下文，线程上残留的状态不可见
        context::sync_with_context(context, || {
            let _guard = ContextGuard::new();
            resolver.resolve_current(Boundary::Handoff)?;
            Ok::<_, TraceError>(work())
        })
    }

    /// 异步版本的 [`ContextSnapshot::run`]
    pub async fn run_async<F>(self, resolver: &TraceResolver, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        let Self { context, span } = self;
        context::with_context(context, async move {
            let _guard = ContextGuard::new();
            resolver.resolve_current(Boundary::Handoff)?;
            Ok::<_, TraceError>(future.await)
        })
        .instrument(span)
        .await
    }
}

/// 为池化执行接口附加追踪上下文交接的装饰器
#[derive(Debug, Clone)]
pub struct TracingExecutor<E> {
    inner: E,
    resolver: Arc<TraceResolver>,
}

impl<E> TracingExecutor<E> {
    pub fn new(inner: E, resolver: Arc<TraceResolver>) -> Self {
        Self { inner, resolver }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// 包装同步工作：立即捕获快照，返回的闭包在执行端安装快照
    pub fn wrap<F>(&self, work: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce() + Send + 'static,
    {
        let snapshot = ContextSnapshot::capture();
        let resolver = Arc::clone(&self.resolver);
        move || {
            if let Err(err) = snapshot.run(&resolver, work) {
                tracing::error!(error = %err, "Failed to resolve trace id for handed-off task, task dropped");
            }
        }
    }

    /// 在Tokio运行时上派生异步任务，并交接当前追踪上下文
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<Result<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let snapshot = ContextSnapshot::capture();
        let resolver = Arc::clone(&self.resolver);
        tokio::spawn(async move { snapshot.run_async(&resolver, future).await })
    }
}

impl<E: Executor> Executor for TracingExecutor<E> {
    fn execute(&self, task: Task) {
        self.inner.execute(Box::new(self.wrap(task)));
    }
}
