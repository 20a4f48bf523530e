//! # token 计数

use crate::error::Result;
use crate::relay::RelayRequest;

/// token 计数器
pub trait TokenCounter: Send + Sync {
    /// 计算请求的提示词 token
    fn count_prompt(&self, request: &RelayRequest) -> Result<u32>;

    /// 计算一段输出文本的 token
    fn count_text(&self, model: &str, text: &str) -> u32;
}

/// 按字符估算的计数器：ASCII 每 4 字节约 1 个 token，其余字符各算 1 个
#[derive(Debug, Clone, Copy)]
pub struct EstimatingTokenCounter {
    /// 单次请求允许的最大提示词 token，超过视为无效请求
    pub max_prompt_tokens: u32,
}

impl Default for EstimatingTokenCounter {
    fn default() -> Self {
        Self {
            max_prompt_tokens: 2_000_000,
        }
    }
}

impl EstimatingTokenCounter {
    fn estimate(text: &str) -> u32 {
        let (ascii, other) = text.chars().fold((0u32, 0u32), |(ascii, other), ch| {
            if ch.is_ascii() {
                (ascii.saturating_add(1), other)
            } else {
                (ascii, other.saturating_add(1))
            }
        });
        ascii.div_ceil(4).saturating_add(other)
    }
}

impl TokenCounter for EstimatingTokenCounter {
    fn count_prompt(&self, request: &RelayRequest) -> Result<u32> {
        let tokens = Self::estimate(&request.prompt);
        crate::ensure_business!(
            tokens <= self.max_prompt_tokens,
            "提示词 token 数 {} 超过上限 {}",
            tokens,
            self.max_prompt_tokens
        );
        Ok(tokens)
    }

    fn count_text(&self, _model: &str, text: &str) -> u32 {
        Self::estimate(text)
    }
}
