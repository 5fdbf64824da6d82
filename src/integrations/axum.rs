//! Axum框架的追踪ID中间件

use crate::{
    config::TraceConfig,
    context,
    error::{Result, TraceError},
    request,
    resolver::TraceResolver,
    trace_id::TraceId,
};
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::Instrument;

/// 追踪ID中间件选项
#[derive(Clone, Debug)]
pub struct LayerOptions {
    /// 是否启用 tracing span（默认启用）
    pub enable_span: bool,
    /// 是否启用响应头（默认启用）
    pub enable_response_header: bool,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            enable_span: true,
            enable_response_header: true,
        }
    }
}

/// 追踪中间件层
///
/// 在请求到达时解析追踪ID，在独立的上下文中执行处理器，并把追踪ID写回响应头。
#[derive(Clone)]
pub struct TraceIdLayer {
    resolver: Arc<TraceResolver>,
    config: Arc<TraceConfig>,
    header: HeaderName,
    options: LayerOptions,
}

impl TraceIdLayer {
    /// 使用默认配置创建追踪ID层
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(TraceResolver::default()),
            config: Arc::new(TraceConfig::default()),
            header: HeaderName::from_static(crate::TRACE_ID_HEADER),
            options: LayerOptions::default(),
        }
    }

    /// 使用已校验的配置创建追踪ID层
    ///
    /// # 错误
    /// 配置中的请求头名称无法作为HTTP头名称时返回 [`TraceError::Configuration`]
    pub fn from_config(config: TraceConfig) -> Result<Self> {
        let header = HeaderName::from_bytes(config.header_name().as_bytes()).map_err(|e| {
            TraceError::Configuration(format!("invalid header name `{}`: {e}", config.header_name()))
        })?;
        Ok(Self {
            resolver: Arc::new(TraceResolver::new(&config)),
            config: Arc::new(config),
            header,
            options: LayerOptions::default(),
        })
    }

    /// 创建高性能模式的追踪ID层
    ///
    /// 禁用 tracing span 以获得最佳性能
    pub fn new_high_performance() -> Self {
        Self::new().with_options(LayerOptions {
            enable_span: false,
            enable_response_header: true,
        })
    }

    /// 替换中间件选项
    pub fn with_options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }

    /// 共享的解析器，可用于构造 [`crate::JobRunner`] 或 [`crate::TracingExecutor`]
    pub fn resolver(&self) -> Arc<TraceResolver> {
        Arc::clone(&self.resolver)
    }
}

impl Default for TraceIdLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for TraceIdLayer {
    type Service = TraceIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceIdService {
            inner,
            resolver: Arc::clone(&self.resolver),
            config: Arc::clone(&self.config),
            header: self.header.clone(),
            options: self.options.clone(),
        }
    }
}

/// 追踪ID服务
#[derive(Clone)]
pub struct TraceIdService<S> {
    inner: S,
    resolver: Arc<TraceResolver>,
    config: Arc<TraceConfig>,
    header: HeaderName,
    options: LayerOptions,
}

impl<S> Service<Request> for TraceIdService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        // 解析必须先于处理器中的任何日志
        let headers = req.headers();
        let begun = request::begin_request(&self.resolver, &self.config, |name: &str| {
            headers.get(name).and_then(|value| value.to_str().ok())
        });
        let trace = match begun {
            Ok(trace) => trace,
            Err(err) => {
                tracing::error!(error = %err, "Failed to resolve request trace id");
                return Box::pin(async { Ok::<_, S::Error>(StatusCode::INTERNAL_SERVER_ERROR.into_response()) });
            }
        };

        let trace_id = trace.trace_id().clone();

        // 将追踪ID添加到请求扩展中，供提取器使用
        req.extensions_mut().insert(trace_id.clone());

        // 提取请求信息用于span（在req被移动之前）
        let span = self.options.enable_span.then(|| {
            tracing::info_span!(
                "request",
                trace_id = %trace_id,
                method = %req.method(),
                uri = %req.uri(),
                auxiliary = ?trace.context().auxiliary()
            )
        });

        let future = self.inner.call(req);
        let header = self.header.clone();
        let enable_response_header = self.options.enable_response_header;

        Box::pin(async move {
            let handled = trace.scope(async move {
                let mut response = future.await?;

                // 根据配置决定是否添加响应头
                if enable_response_header {
                    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
                        response.headers_mut().insert(header, value);
                    }
                }

                Ok::<_, S::Error>(response)
            });

            match span {
                Some(span) => handled.instrument(span).await,
                // 高性能模式：跳过 span 创建
                None => handled.await,
            }
        })
    }
}

// -- TraceId Extractor --

/// Axum 提取器，用于在 handler 函数签名中直接获取 TraceId
///
/// # 示例
/// ```no_run
/// use axum::{routing::get, Router};
/// use trace_chain::{TraceId, TraceIdLayer};
///
/// async fn my_handler(trace_id: TraceId) -> String {
///     tracing::info!(trace_id = %trace_id, "Handler started");
///     format!("Hello! Your trace ID is: {}", trace_id)
/// }
///
/// let app: Router = Router::new()
///     .route("/", get(my_handler))
///     .layer(TraceIdLayer::new());
/// ```
impl<S> FromRequestParts<S> for TraceId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    /// 优先读取中间件写入请求扩展的追踪ID，其次读取当前上下文。
    /// 两者都没有说明中间件没有正确接线。
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TraceId>()
            .cloned()
            .or_else(context::get_trace_id)
            .ok_or_else(|| {
                tracing::error!("TraceId requested but no trace id was resolved for this request. Is TraceIdLayer installed?");
                (StatusCode::INTERNAL_SERVER_ERROR, "trace id is not available")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdditionalHeader, GeneratorConfig, InvokerType};
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    async fn handler(trace_id: TraceId) -> String {
        assert_eq!(context::get_trace_id(), Some(trace_id.clone()));
        trace_id.to_string()
    }

    fn layer() -> TraceIdLayer {
        let request = GeneratorConfig::new(InvokerType::Request, None, Some('_'), Some(6)).unwrap();
        let config = TraceConfig::default()
            .with_generator(request)
            .with_header_name("X-Trace-ID")
            .unwrap()
            .with_additional_header(AdditionalHeader::new("tenant", "X-Tenant-ID"))
            .unwrap();
        TraceIdLayer::from_config(config).unwrap()
    }

    // --- 提取器测试 ---
    #[tokio::test]
    async fn test_trace_id_extractor() {
        let (mut parts, _body) = Request::builder().uri("/test").body(()).unwrap().into_parts();
        let expected = TraceId::from_string_unchecked("root123_abcdef");

        let extracted = crate::context::with_context(
            crate::TraceContext::with_trace_id(expected.clone()),
            async { TraceId::from_request_parts(&mut parts, &()).await },
        )
        .await
        .expect("TraceId extraction should succeed inside a trace context");
        assert_eq!(extracted, expected);

        // 没有中间件也没有上下文时拒绝
        let (mut parts, _body) = Request::builder().uri("/test").body(()).unwrap().into_parts();
        let rejection = TraceId::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(rejection.0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    // --- 中间件/服务测试 ---
    #[tokio::test]
    async fn test_end_to_end_flow() {
        let app = Router::new().route("/", get(handler)).layer(layer());

        // 场景1: 提供入站ID，响应中的ID是它的扩展
        let request = Request::builder()
            .uri("/")
            .header("X-Trace-ID", "root123")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let header_id = response.headers().get("x-trace-id").unwrap().to_str().unwrap().to_owned();
        assert!(header_id.starts_with("root123_"));
        assert_eq!(header_id.len(), "root123_".len() + 6);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], header_id.as_bytes());

        // 场景2: 不提供ID
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let header_id = response.headers().get("x-trace-id").unwrap().to_str().unwrap().to_owned();
        assert_eq!(header_id.len(), 6);

        assert_eq!(context::get_trace_id(), None);
    }

    #[tokio::test]
    async fn test_additional_headers_reach_context() {
        async fn tenant() -> String {
            context::auxiliary().get("tenant").cloned().unwrap_or_default()
        }

        let app = Router::new().route("/", get(tenant)).layer(layer());
        let request = Request::builder()
            .uri("/")
            .header("X-Tenant-ID", "acme")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"acme");
    }

    #[tokio::test]
    async fn test_high_performance_mode() {
        let app = Router::new()
            .route("/", get(handler))
            .layer(TraceIdLayer::new_high_performance());
        let request = Request::builder()
            .uri("/")
            .header(crate::TRACE_ID_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let header_id = response.headers().get(crate::TRACE_ID_HEADER).unwrap().to_str().unwrap();
        assert!(header_id.starts_with("abc_"));
    }

    #[tokio::test]
    async fn test_disable_response_header() {
        let options = LayerOptions {
            enable_span: true,
            enable_response_header: false,
        };
        let app = Router::new()
            .route("/", get(handler))
            .layer(TraceIdLayer::new().with_options(options));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(crate::TRACE_ID_HEADER).is_none());
    }

    /// 内层服务返回错误时错误原样传出，处理期间上下文可见
    #[tokio::test]
    async fn test_inner_service_error_passes_through() {
        let service = layer().layer(tower::service_fn(|_req: Request<Body>| async {
            assert!(context::get_trace_id().unwrap().as_str().starts_with("root123_"));
            Err::<Response, _>(std::io::Error::other("upstream unavailable"))
        }));

        let request = Request::builder()
            .uri("/")
            .header("X-Trace-ID", "root123")
            .body(Body::empty())
            .unwrap();
        let err = service.oneshot(request).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream unavailable");
        assert_eq!(context::get_trace_id(), None);
    }

    /// 处理器panic穿出中间件后上下文不残留
    #[tokio::test]
    async fn test_handler_panic_does_not_leak() {
        use futures::FutureExt;

        async fn exploding() -> &'static str {
            panic!("handler failed")
        }

        let app = Router::new().route("/", get(exploding)).layer(layer());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let outcome = std::panic::AssertUnwindSafe(app.oneshot(request)).catch_unwind().await;
        assert!(outcome.is_err());
        assert_eq!(context::get_trace_id(), None);
    }
}
