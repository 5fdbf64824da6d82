//! 追踪ID片段生成器

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::trace_id::TraceId;

/// 随机片段字母表：字母、数字和下划线
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";

/// 追踪ID生成器
///
/// 按配置生成固定长度的片段（可选前缀 + 随机字符），并将其追加到父追踪ID之后。
/// 随机源使用 `fastrand`，不要求密码学强度，只要求实际使用中不易冲突。
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: GeneratorConfig,
}

impl IdGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// 生成一个长度恰好为 `config.length` 的片段
    #[inline]
    pub fn segment(&self) -> String {
        let prefix = self.config.prefix().unwrap_or_default();
        // 配置加载时已保证前缀严格短于长度
        let random_len = self.config.length().saturating_sub(prefix.len());

        let mut segment = String::with_capacity(self.config.length());
        segment.push_str(prefix);
        segment.extend((0..random_len).map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char));
        segment
    }

    /// 生成新的追踪ID
    ///
    /// # 参数
    /// * `parent` - 父追踪ID；有内容时结果为 `parent + delimiter + segment`，否则只有片段
    ///
    /// # 错误
    /// 根调用者的配置没有分隔符，传入非空父ID时返回 [`crate::TraceError::InvalidState`]
    pub fn generate(&self, parent: Option<&str>) -> Result<TraceId> {
        match parent.filter(|p| !p.trim().is_empty()) {
            None => Ok(TraceId::from_generated(self.segment())),
            Some(parent) => {
                let delimiter = self.config.delimiter()?;
                let segment = self.segment();
                let mut id = String::with_capacity(parent.len() + 1 + segment.len());
                id.push_str(parent);
                id.push(delimiter);
                id.push_str(&segment);
                Ok(TraceId::from_generated(id))
            }
        }
    }
}
