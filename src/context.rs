//! 追踪ID上下文管理
//!
//! 使用 `tokio::task_local` 提供与Web框架无关的追踪上下文存储。
//! 每个执行单元（请求、定时任务、线程池任务）通过 [`with_context`] 或
//! [`sync_with_context`] 挂载自己独立的 [`TraceContext`]，互不共享。
//! `sync_with_context` 基于 `sync_scope`，不依赖Tokio运行时，可以用在任意线程上。

use crate::error::{Result, TraceError};
use crate::trace_id::TraceId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use tokio::task_local;

// 使用tokio的task_local来存储当前执行单元的追踪上下文
task_local! {
    static CURRENT_CONTEXT: RefCell<TraceContext>;
}

/// 执行单元的追踪上下文
///
/// 保存当前追踪ID以及一组附加的关联字段（例如从请求头复制的值）。
/// 追踪ID只能通过追加子片段增长，不能被替换。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    current: Option<TraceId>,
    auxiliary: HashMap<String, String>,
}

impl TraceContext {
    /// 创建空上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用已有的追踪ID创建上下文
    pub fn with_trace_id(trace_id: TraceId) -> Self {
        Self {
            current: Some(trace_id),
            auxiliary: HashMap::new(),
        }
    }

    /// 获取当前追踪ID
    pub fn get(&self) -> Option<&TraceId> {
        self.current.as_ref().filter(|id| !id.is_empty())
    }

    /// 设置追踪ID
    ///
    /// 上下文为空时直接写入；否则新ID必须以现有ID为前缀。
    ///
    /// # 错误
    /// 新ID不是现有ID的扩展时返回 [`TraceError::InvalidState`]
    pub fn set(&mut self, trace_id: TraceId) -> Result<()> {
        if let Some(old) = self.get() {
            if !trace_id.extends(old) {
                return Err(TraceError::invalid_state(format!(
                    "overriding existing trace id is prohibited, appending is allowed \
                     (existing: {old}, attempted: {trace_id})"
                )));
            }
        }
        self.current = Some(trace_id);
        Ok(())
    }

    /// 写入附加字段，允许覆盖
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.auxiliary.insert(key.into(), value.into());
    }

    /// 附加字段
    pub fn auxiliary(&self) -> &HashMap<String, String> {
        &self.auxiliary
    }

    /// 清空追踪ID和附加字段
    pub fn clear(&mut self) {
        self.current = None;
        self.auxiliary.clear();
    }

    /// 是否没有追踪ID也没有附加字段
    pub fn is_empty(&self) -> bool {
        self.get().is_none() && self.auxiliary.is_empty()
    }
}

/// 在当前作用域的上下文上执行操作
pub(crate) fn with_current<R>(f: impl FnOnce(&mut TraceContext) -> R) -> Result<R> {
    CURRENT_CONTEXT
        .try_with(|cell| f(&mut *cell.borrow_mut()))
        .map_err(|_| TraceError::NoContext)
}

/// 获取当前追踪ID
///
/// 不在追踪上下文作用域内或尚未解析时返回None。
pub fn get_trace_id() -> Option<TraceId> {
    with_current(|ctx| ctx.get().cloned()).ok().flatten()
}

/// 设置当前追踪ID，遵循只能追加的约束
pub fn set_trace_id(trace_id: TraceId) -> Result<()> {
    with_current(|ctx| ctx.set(trace_id))?
}

/// 向当前上下文写入附加字段
pub fn put_auxiliary(key: impl Into<String>, value: impl Into<String>) -> Result<()> {
    with_current(|ctx| ctx.put(key, value))
}

/// 获取当前上下文的附加字段副本
pub fn auxiliary() -> HashMap<String, String> {
    with_current(|ctx| ctx.auxiliary().clone()).unwrap_or_default()
}

/// 清空当前上下文
///
/// 幂等；不在作用域内时什么也不做。
pub fn clear() {
    let _ = with_current(TraceContext::clear);
}

/// 当前是否处于追踪上下文作用域内
pub fn in_scope() -> bool {
    CURRENT_CONTEXT.try_with(|_| ()).is_ok()
}

/// 获取当前上下文的快照
pub fn snapshot() -> Option<TraceContext> {
    with_current(|ctx| ctx.clone()).ok()
}

/// 在指定的追踪上下文中执行异步操作
///
/// # 参数
/// * `context` - 本执行单元独占的上下文
/// * `future` - 要执行的异步操作
pub async fn with_context<F, T>(context: TraceContext, future: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_CONTEXT.scope(RefCell::new(context), future).await
}

/// 在指定的追踪上下文中执行同步操作
pub fn sync_with_context<F, T>(context: TraceContext, f: F) -> T
where
    F: FnOnce() -> T,
{
    CURRENT_CONTEXT.sync_scope(RefCell::new(context), f)
}

/// 作用域清理句柄
///
/// 被丢弃时清空当前上下文，包括panic展开和future被取消的情况，
/// 保证工作线程被复用前不会残留上一个执行单元的追踪ID。
#[derive(Debug)]
#[must_use = "the context is cleared when the guard is dropped"]
pub struct ContextGuard {
    _private: (),
}

impl ContextGuard {
    /// 创建清理句柄
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ContextGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        clear();
    }
}
