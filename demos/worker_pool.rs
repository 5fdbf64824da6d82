//! Example: scheduled jobs handing work off to a blocking worker pool
//!
//! Run with `RUST_LOG=debug cargo run --example worker_pool`.

use std::sync::Arc;
use std::time::Duration;
use trace_chain::{get_trace_id, Executor, JobRunner, TraceConfig, TraceResolver, TracingExecutor};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TraceConfig::from_toml_str("[job]\nprefix = \"job\"\nlength = 12\n")
        .expect("invalid trace configuration");
    let resolver = Arc::new(TraceResolver::new(&config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .max_blocking_threads(2)
        .build()
        .unwrap();
    let pool = TracingExecutor::new(runtime.handle().clone(), Arc::clone(&resolver));
    let runner = JobRunner::new(resolver);

    for tick in 0..3 {
        runner.run("report", || {
            tracing::info!(tick, trace_id = ?get_trace_id(), "Job started");
            for part in 0..2 {
                pool.execute(Box::new(move || {
                    tracing::info!(tick, part, trace_id = ?get_trace_id(), "Worker processing");
                }));
            }
            if tick == 2 {
                return Err("last tick fails on purpose");
            }
            Ok(())
        });
    }

    runtime.shutdown_timeout(Duration::from_secs(1));
}
