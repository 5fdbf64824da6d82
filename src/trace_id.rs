//! TraceId 核心结构体定义

use std::fmt;

/// 入站追踪ID允许的最大长度
///
/// 追踪ID会随着每一跳追加片段而增长，这里限制的是从外部请求头接收的值。
pub const MAX_INBOUND_LEN: usize = 512;

/// 追踪ID
///
/// 由一个或多个片段通过分隔符连接而成的不透明字符串，表示跨进程、线程和服务的调用链深度。
/// 相等和比较都是字符串级别的；唯一的语义操作是判断一个ID是否是另一个ID的扩展。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// 由生成器产生的字符串构造（内部使用）
    #[inline]
    pub(crate) fn from_generated(id: String) -> Self {
        Self(id)
    }

    /// 从请求头等外部来源解析追踪ID
    ///
    /// # 校验规则
    /// - 去除首尾空白后不能为空
    /// - 长度不能超过 [`MAX_INBOUND_LEN`]
    /// - 只能包含可见的ASCII字符（不含空格和控制字符）
    ///
    /// # 返回
    /// 如果格式有效则返回Some(TraceId)，否则返回None
    pub fn parse_inbound(raw: &str) -> Option<Self> {
        let id = raw.trim();
        if id.is_empty() || id.len() > MAX_INBOUND_LEN {
            return None;
        }

        // 字节级验证：非ASCII字节一定不是可见ASCII字符
        if !id.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }

        Some(Self(id.to_string()))
    }

    /// 从字符串创建追踪ID（不进行校验）
    ///
    /// 当确定输入有效时使用，例如在测试中或从可信的内部来源恢复追踪ID。
    #[inline]
    pub fn from_string_unchecked(id: &str) -> Self {
        Self(id.to_string())
    }

    /// 获取追踪ID字符串
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 判断当前ID是否是 `ancestor` 的扩展（即以它为前缀）
    ///
    /// 相同的ID也视为扩展。
    #[inline]
    pub fn extends(&self, ancestor: &TraceId) -> bool {
        self.0.starts_with(ancestor.as_str())
    }

    /// 是否为空字符串
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TraceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.0
    }
}
