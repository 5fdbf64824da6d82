//! 定时任务边界适配
//!
//! 定时任务是调用链的起点。[`JobRunner`] 在任务逻辑之前解析根追踪ID，之后无论成功与否都清空上下文。
//! 任务失败（返回错误或panic）以及追踪解析失败只记录日志，不会向调度器传播。

use crate::context::{self, ContextGuard, TraceContext};
use crate::resolver::{Boundary, TraceResolver};
use crate::trace_id::TraceId;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Instrument;

/// 定时任务执行器
#[derive(Debug, Clone)]
pub struct JobRunner {
    resolver: Arc<TraceResolver>,
}

impl JobRunner {
    pub fn new(resolver: Arc<TraceResolver>) -> Self {
        Self { resolver }
    }

    /// 执行同步任务
    ///
    /// 每次运行都在独立的嵌套作用域中进行，调度线程自己的上下文不会被修改。
    /// 调度线程作用域中遗留的追踪ID会被带入嵌套作用域，使解析立即失败并暴露出来。
    ///
    /// # 返回
    /// 任务成功时返回Some，追踪解析失败、任务返回错误或panic时返回None
    pub fn run<F, T, E>(&self, job_name: &str, job: F) -> Option<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        context::sync_with_context(inherited_context(), || {
            let _guard = ContextGuard::new();
            let Some(trace_id) = self.resolve(job_name) else {
                return None;
            };

            let span = tracing::info_span!("job", job = job_name, trace_id = %trace_id);
            let outcome = span.in_scope(|| panic::catch_unwind(AssertUnwindSafe(job)));
            report(job_name, outcome)
        })
    }

    /// 执行异步任务
    ///
    /// 与 [`JobRunner::run`] 规则相同，任务中的panic同样被捕获并记录。
    pub async fn run_async<F, T, E>(&self, job_name: &str, job: F) -> Option<T>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        context::with_context(inherited_context(), async move {
            let _guard = ContextGuard::new();
            let Some(trace_id) = self.resolve(job_name) else {
                return None;
            };

            let span = tracing::info_span!("job", job = job_name, trace_id = %trace_id);
            let outcome = AssertUnwindSafe(job.instrument(span)).catch_unwind().await;
            report(job_name, outcome)
        })
        .await
    }

    fn resolve(&self, job_name: &str) -> Option<TraceId> {
        self.resolver
            .resolve_current(Boundary::Job)
            .map_err(|err| {
                tracing::error!(job = job_name, error = %err, "Failed to resolve job trace id, run skipped");
            })
            .ok()
    }
}

/// 嵌套作用域的初始上下文：调度线程作用域的副本，不在作用域内时为空
fn inherited_context() -> TraceContext {
    context::snapshot().unwrap_or_default()
}

fn report<T, E: fmt::Display>(
    job_name: &str,
    outcome: Result<Result<T, E>, Box<dyn Any + Send>>,
) -> Option<T> {
    match outcome {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::error!(job = job_name, error = %err, "Job failed");
            None
        }
        Err(payload) => {
            tracing::error!(job = job_name, panic = panic_message(payload.as_ref()), "Job panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneratorConfig, InvokerType, TraceConfig};
    use crate::context::{auxiliary, get_trace_id, put_auxiliary, sync_with_context};

    fn runner(length: usize) -> JobRunner {
        let job = GeneratorConfig::new(InvokerType::Job, None, None, Some(length)).unwrap();
        JobRunner::new(Arc::new(TraceResolver::new(
            &TraceConfig::default().with_generator(job),
        )))
    }

    #[test]
    fn test_job_gets_root_trace_id() {
        let seen = runner(20)
            .run("cleanup", || Ok::<_, String>(get_trace_id()))
            .unwrap()
            .unwrap();
        assert_eq!(seen.as_str().len(), 20);
        assert_eq!(get_trace_id(), None);
    }

    #[test]
    fn test_job_errors_are_swallowed() {
        let runner = runner(20);
        assert_eq!(runner.run("failing", || Err::<(), _>("boom")), None);

        let result: Option<()> = runner.run("panicking", || -> Result<(), String> {
            panic!("job exploded")
        });
        assert_eq!(result, None);
    }

    #[test]
    fn test_scheduler_scope_is_cleared_between_runs() {
        let runner = runner(20);
        sync_with_context(TraceContext::new(), || {
            let first = runner.run("tick", || Ok::<_, String>(get_trace_id())).unwrap();
            assert_eq!(get_trace_id(), None);
            let second = runner.run("tick", || Ok::<_, String>(get_trace_id())).unwrap();
            assert_ne!(first, second);

            // panic之后同样会清空
            let _ = runner.run("tick", || -> Result<(), String> { panic!("boom") });
            assert_eq!(get_trace_id(), None);
        });
    }

    #[test]
    fn test_job_refuses_inherited_trace_id() {
        let runner = runner(20);
        let parent = TraceId::from_string_unchecked("request-1");

        sync_with_context(TraceContext::with_trace_id(parent.clone()), || {
            let mut ran = false;
            let result = runner.run("nested", || {
                ran = true;
                Ok::<_, String>(())
            });
            assert_eq!(result, None);
            assert!(!ran);
            // 不属于本次运行的上下文保持不变
            assert_eq!(get_trace_id(), Some(parent.clone()));
        });
    }

    #[tokio::test]
    async fn test_async_job() {
        let runner = runner(16);
        let seen = runner
            .run_async("sync-report", async {
                tokio::task::yield_now().await;
                Ok::<_, String>(get_trace_id())
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.as_str().len(), 16);

        assert_eq!(
            runner.run_async("failing", async { Err::<(), _>("boom") }).await,
            None
        );
        assert_eq!(get_trace_id(), None);
    }

    /// 调度线程的附加字段在任务中可见，运行结束后保持原样
    #[test]
    fn test_scheduler_auxiliary_survives_runs() {
        let runner = runner(20);
        sync_with_context(TraceContext::new(), || {
            put_auxiliary("worker", "sched-1").unwrap();

            let seen = runner
                .run("tick", || Ok::<_, String>(auxiliary().get("worker").cloned()))
                .unwrap();
            assert_eq!(seen.as_deref(), Some("sched-1"));

            let _ = runner.run("tick", || -> Result<(), String> { panic!("boom") });
            assert_eq!(auxiliary().get("worker").map(String::as_str), Some("sched-1"));
            assert_eq!(get_trace_id(), None);
        });
    }

    /// 异步任务panic不会传播到调度任务
    #[tokio::test]
    async fn test_async_job_panic_is_contained() {
        let runner = runner(20);
        let handle = tokio::spawn(async move {
            runner
                .run_async::<_, (), String>("panics", async {
                    tokio::task::yield_now().await;
                    panic!("boom")
                })
                .await
        });

        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_async_job_keeps_scheduler_context() {
        let runner = runner(20);
        crate::context::with_context(TraceContext::new(), async {
            put_auxiliary("worker", "sched-2").unwrap();
            let seen = runner
                .run_async("tick", async { Ok::<_, String>(get_trace_id()) })
                .await
                .flatten();
            assert!(seen.is_some());
            assert_eq!(get_trace_id(), None);
            assert_eq!(auxiliary().get("worker").map(String::as_str), Some("sched-2"));
        })
        .await;
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
