//! # 单次请求的重试状态
//!
//! 由发起请求的控制流独占，不跨请求共享

use std::collections::HashSet;
use std::time::{Duration, Instant};

/// 重试上下文
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 已尝试并失败的渠道
    excluded: HashSet<i32>,
    attempts: u32,
    /// 请求开始时可用的渠道数，之后不再重新计算
    total_channels_at_start: usize,
    /// 最多尝试次数（含首次），请求开始时确定
    max_attempts: u32,
    /// 配置的最大重试次数
    configured_retries: u32,
    started_at: Instant,
    timeout: Duration,
}

impl RetryContext {
    /// 创建上下文，总尝试次数为 `min(重试次数 + 1, 可用渠道数)`，至少一次
    #[must_use]
    pub fn new(configured_retries: u32, total_channels_at_start: usize, timeout: Duration) -> Self {
        Self::started_at(configured_retries, total_channels_at_start, timeout, Instant::now())
    }

    #[must_use]
    pub fn started_at(
        configured_retries: u32,
        total_channels_at_start: usize,
        timeout: Duration,
        started_at: Instant,
    ) -> Self {
        let channels = u32::try_from(total_channels_at_start).unwrap_or(u32::MAX);
        let max_attempts = configured_retries.saturating_add(1).min(channels).max(1);

        Self {
            excluded: HashSet::new(),
            attempts: 0,
            total_channels_at_start,
            max_attempts,
            configured_retries,
            started_at,
            timeout,
        }
    }

    /// 记录一次尝试，返回当前尝试序号（从 1 开始）
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// 将失败渠道加入排除集合
    pub fn exclude(&mut self, channel_id: i32) {
        self.excluded.insert(channel_id);
    }

    #[must_use]
    pub const fn excluded(&self) -> &HashSet<i32> {
        &self.excluded
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 实际可用的重试次数
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_attempts - 1
    }

    #[must_use]
    pub const fn configured_retries(&self) -> u32 {
        self.configured_retries
    }

    #[must_use]
    pub const fn total_channels_at_start(&self) -> usize {
        self.total_channels_at_start
    }

    /// 是否还有尝试次数
    #[must_use]
    pub const fn has_budget(&self) -> bool {
        self.attempts < self.max_attempts
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 是否已超过重试时限
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        self.elapsed() > self.timeout
    }
}
