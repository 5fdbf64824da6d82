//! Example: serving HTTP with hierarchical trace ids
//!
//! Run with `cargo run --example tracing_example --features axum`, then
//! `curl -H 'X-Trace-ID: root123' -i localhost:3000/`.

use axum::{routing::get, Router};
use std::sync::Arc;
use trace_chain::{TraceConfig, TraceId, TraceIdLayer, TracingExecutor};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Must properly configure subscriber to see trace_id in logs
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Invalid trace configuration must stop the process at boot
    let config = TraceConfig::from_toml_str(
        r#"
        header_name = "X-Trace-ID"

        [request]
        length = 6

        [thread]
        prefix = "t"
        length = 5

        [[additional_headers]]
        context_key = "tenant"
        header_name = "X-Tenant-ID"
        "#,
    )
    .expect("invalid trace configuration");
    let layer = TraceIdLayer::from_config(config).expect("invalid trace configuration");
    let executor = Arc::new(TracingExecutor::new((), layer.resolver()));

    let app = Router::new()
        .route("/", get(handler))
        .route(
            "/offload",
            get(move || {
                let executor = Arc::clone(&executor);
                async move {
                    let worker_id = executor
                        .spawn(async {
                            tracing::info!("Running on a worker task");
                            trace_chain::get_trace_id()
                        })
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .flatten();
                    format!("worker trace ID: {worker_id:?}")
                }
            }),
        )
        .layer(layer);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();

    tracing::info!("Starting server on 0.0.0.0:3000");
    axum::serve(listener, app).await.unwrap();
}

async fn handler(trace_id: TraceId) -> String {
    // These logs display trace_id because the middleware sets it on the request span
    tracing::info!("Handling request");
    let tenant = trace_chain::context::auxiliary().get("tenant").cloned();
    tracing::debug!(?tenant, "Correlation fields");
    format!("Hello! Your trace ID is: {trace_id}")
}
