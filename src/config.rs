//! 追踪ID配置
//!
//! 每种调用者（请求、定时任务、线程池任务）都有独立的生成配置：前缀、分隔符和片段长度。
//! 配置在启动时通过 [`TraceConfig::from_settings`] 或 [`TraceConfig::from_toml_str`]
//! 一次性校验，之后只读，可在线程间自由共享。

use crate::error::{Result, TraceError};
use crate::TRACE_ID_HEADER;
use serde::{Deserialize, Serialize};

/// 默认分隔符
pub const DEFAULT_DELIMITER: char = '_';

/// 调用者类型
///
/// 集合是封闭的：请求、定时任务（根调用者）、线程池任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokerType {
    /// 入站同步请求
    Request,
    /// 定时任务，调用链的起点
    Job,
    /// 提交到工作线程池的异步任务
    Thread,
}

impl InvokerType {
    /// 片段长度的允许范围 `[min, max]`
    pub const fn length_bounds(self) -> (usize, usize) {
        match self {
            Self::Request | Self::Thread => (4, 32),
            Self::Job => (8, 64),
        }
    }

    /// 默认片段长度
    pub const fn default_length(self) -> usize {
        match self {
            Self::Request | Self::Thread => 6,
            Self::Job => 20,
        }
    }

    /// 根调用者从不继承父追踪ID
    pub const fn is_root(self) -> bool {
        matches!(self, Self::Job)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Job => "job",
            Self::Thread => "thread",
        }
    }
}

/// 单个调用者的生成配置（已校验）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    invoker: InvokerType,
    prefix: Option<String>,
    delimiter: Option<char>,
    length: usize,
}

impl GeneratorConfig {
    /// 创建并校验生成配置
    ///
    /// 未指定的字段使用调用者的默认值。
    ///
    /// # 错误
    /// - 长度超出调用者允许的范围
    /// - 前缀长度不小于片段长度
    /// - 前缀或分隔符包含非可见ASCII字符
    /// - 为根调用者配置了分隔符
    pub fn new(
        invoker: InvokerType,
        prefix: Option<String>,
        delimiter: Option<char>,
        length: Option<usize>,
    ) -> Result<Self> {
        let name = invoker.as_str();
        let (min, max) = invoker.length_bounds();
        let length = length.unwrap_or_else(|| invoker.default_length());
        if !(min..=max).contains(&length) {
            return Err(TraceError::configuration(format!(
                "{name} trace id length {length} is outside the allowed range [{min}, {max}]"
            )));
        }

        let prefix = prefix.filter(|p| !p.is_empty());
        if let Some(prefix) = &prefix {
            if !prefix.bytes().all(|b| b.is_ascii_graphic()) {
                return Err(TraceError::configuration(format!(
                    "{name} trace id prefix `{prefix}` must contain only visible ASCII characters"
                )));
            }
            if prefix.len() >= length {
                return Err(TraceError::configuration(format!(
                    "{name} trace id prefix `{prefix}` must be shorter than the configured length {length}"
                )));
            }
        }

        let delimiter = if invoker.is_root() {
            if let Some(delimiter) = delimiter {
                return Err(TraceError::configuration(format!(
                    "{name} is a root invoker and does not accept a delimiter (got `{delimiter}`)"
                )));
            }
            None
        } else {
            let delimiter = delimiter.unwrap_or(DEFAULT_DELIMITER);
            if !delimiter.is_ascii_graphic() {
                return Err(TraceError::configuration(format!(
                    "{name} trace id delimiter {delimiter:?} must be a visible ASCII character"
                )));
            }
            Some(delimiter)
        };

        Ok(Self {
            invoker,
            prefix,
            delimiter,
            length,
        })
    }

    /// 调用者的默认配置
    pub fn defaults(invoker: InvokerType) -> Self {
        Self {
            invoker,
            prefix: None,
            delimiter: (!invoker.is_root()).then_some(DEFAULT_DELIMITER),
            length: invoker.default_length(),
        }
    }

    pub fn invoker(&self) -> InvokerType {
        self.invoker
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// 分隔符
    ///
    /// # 错误
    /// 根调用者从不追加到父ID，读取其分隔符返回 [`TraceError::InvalidState`]
    pub fn delimiter(&self) -> Result<char> {
        self.delimiter.ok_or_else(|| {
            TraceError::invalid_state(format!(
                "{} is a root invoker, it never appends to a parent trace id and has no delimiter",
                self.invoker.as_str()
            ))
        })
    }
}

/// 单个调用者的原始配置项
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvokerSettings {
    pub prefix: Option<String>,
    pub delimiter: Option<char>,
    pub length: Option<usize>,
}

/// 需要复制到上下文附加字段中的请求头
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdditionalHeader {
    /// 附加字段中的键
    pub context_key: String,
    /// 请求头名称
    pub header_name: String,
}

impl AdditionalHeader {
    pub fn new(context_key: impl Into<String>, header_name: impl Into<String>) -> Self {
        Self {
            context_key: context_key.into(),
            header_name: header_name.into(),
        }
    }
}

/// 原始配置（未校验）
///
/// ```toml
/// header_name = "X-Trace-ID"
///
/// [request]
/// delimiter = "_"
/// length = 6
///
/// [job]
/// prefix = "job"
/// length = 20
///
/// [[additional_headers]]
/// context_key = "tenant"
/// header_name = "X-Tenant-ID"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TraceSettings {
    pub header_name: String,
    pub additional_headers: Vec<AdditionalHeader>,
    pub request: InvokerSettings,
    pub job: InvokerSettings,
    pub thread: InvokerSettings,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            header_name: TRACE_ID_HEADER.to_string(),
            additional_headers: Vec::new(),
            request: InvokerSettings::default(),
            job: InvokerSettings::default(),
            thread: InvokerSettings::default(),
        }
    }
}

/// 校验后的完整追踪配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    header_name: String,
    additional_headers: Vec<AdditionalHeader>,
    request: GeneratorConfig,
    job: GeneratorConfig,
    thread: GeneratorConfig,
}

impl TraceConfig {
    /// 校验原始配置
    pub fn from_settings(settings: TraceSettings) -> Result<Self> {
        let TraceSettings {
            header_name,
            additional_headers,
            request,
            job,
            thread,
        } = settings;

        validate_header_name(&header_name)?;
        additional_headers.iter().try_for_each(validate_additional_header)?;

        let build = |invoker, s: InvokerSettings| {
            GeneratorConfig::new(invoker, s.prefix, s.delimiter, s.length)
        };

        let config = Self {
            header_name,
            additional_headers,
            request: build(InvokerType::Request, request)?,
            job: build(InvokerType::Job, job)?,
            thread: build(InvokerType::Thread, thread)?,
        };
        tracing::debug!(
            header = %config.header_name,
            additional_headers = config.additional_headers.len(),
            "trace configuration loaded"
        );
        Ok(config)
    }

    /// 从TOML文本加载并校验配置
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: TraceSettings = toml::from_str(source)
            .map_err(|e| TraceError::configuration(format!("failed to parse settings: {e}")))?;
        Self::from_settings(settings)
    }

    /// 替换某个调用者的生成配置
    pub fn with_generator(mut self, config: GeneratorConfig) -> Self {
        match config.invoker() {
            InvokerType::Request => self.request = config,
            InvokerType::Job => self.job = config,
            InvokerType::Thread => self.thread = config,
        }
        self
    }

    /// 替换追踪ID请求头名称
    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Result<Self> {
        let header_name = header_name.into();
        validate_header_name(&header_name)?;
        self.header_name = header_name;
        Ok(self)
    }

    /// 追加一个需要复制到附加字段的请求头
    pub fn with_additional_header(mut self, header: AdditionalHeader) -> Result<Self> {
        validate_additional_header(&header)?;
        self.additional_headers.push(header);
        Ok(self)
    }

    pub fn generator(&self, invoker: InvokerType) -> &GeneratorConfig {
        match invoker {
            InvokerType::Request => &self.request,
            InvokerType::Job => &self.job,
            InvokerType::Thread => &self.thread,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn additional_headers(&self) -> &[AdditionalHeader] {
        &self.additional_headers
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            header_name: TRACE_ID_HEADER.to_string(),
            additional_headers: Vec::new(),
            request: GeneratorConfig::defaults(InvokerType::Request),
            job: GeneratorConfig::defaults(InvokerType::Job),
            thread: GeneratorConfig::defaults(InvokerType::Thread),
        }
    }
}

/// 请求头名称必须是非空的HTTP token
fn validate_header_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if valid {
        Ok(())
    } else {
        Err(TraceError::configuration(format!("`{name}` is not a valid header name")))
    }
}

fn validate_additional_header(header: &AdditionalHeader) -> Result<()> {
    if header.context_key.trim().is_empty() {
        return Err(TraceError::configuration(format!(
            "additional header `{}` has an empty context key",
            header.header_name
        )));
    }
    validate_header_name(&header.header_name)
}
