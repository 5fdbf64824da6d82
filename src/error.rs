//! 追踪子系统的错误类型

use thiserror::Error;

/// 追踪操作的结果类型
pub type Result<T> = std::result::Result<T, TraceError>;

/// 追踪子系统可能产生的错误
///
/// 这些错误都表示接线或配置上的缺陷，而不是可以重试的运行时状况。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// 违反了追踪ID只能追加的约束，或在非空上下文中解析根调用者
    #[error("invalid trace state: {0}")]
    InvalidState(String),

    /// 启动时加载的配置无效
    #[error("invalid trace configuration: {0}")]
    Configuration(String),

    /// 当前执行单元没有建立追踪上下文作用域
    #[error("no trace context is in scope for the current execution unit")]
    NoContext,
}

impl TraceError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
