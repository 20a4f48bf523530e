//! # 渠道冷却表
//!
//! 记录 `(渠道, 模型)` 的抑制截止时间。过期条目视同不存在，
//! 由后台任务定期清理

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ldebug;
use crate::logging::{LogComponent, LogStage};

const MAX_COOLDOWN_SECONDS: u64 = 7 * 24 * 3600;

/// 冷却跟踪器
#[derive(Debug)]
pub struct CooldownTracker {
    entries: DashMap<(i32, String), DateTime<Utc>>,
    duration: Duration,
}

impl CooldownTracker {
    /// 创建冷却跟踪器，`seconds` 为 0 时冷却功能关闭
    #[must_use]
    pub fn new(seconds: u64) -> Self {
        Self {
            entries: DashMap::new(),
            duration: Duration::seconds(
                i64::try_from(seconds.min(MAX_COOLDOWN_SECONDS)).unwrap_or_default(),
            ),
        }
    }

    /// 冷却时长
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// 为渠道在指定模型上设置冷却，返回冷却是否处于生效状态
    pub fn set_cooldown(&self, channel_id: i32, model: &str) -> bool {
        self.set_cooldown_at(channel_id, model, Utc::now())
    }

    /// 以给定时刻为基准设置冷却
    ///
    /// 已有未过期的记录时保持原截止时间不变
    pub fn set_cooldown_at(&self, channel_id: i32, model: &str, now: DateTime<Utc>) -> bool {
        if channel_id == 0 || model.is_empty() || self.duration <= Duration::zero() {
            return false;
        }

        let expires_at = now + self.duration;
        match self.entries.entry((channel_id, model.to_string())) {
            Entry::Occupied(mut occupied) => {
                if now < *occupied.get() {
                    return true;
                }
                occupied.insert(expires_at);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
            }
        }

        ldebug!(
            "system",
            LogStage::Cooldown,
            LogComponent::Cooldown,
            "set_cooldown",
            "渠道进入冷却",
            channel_id = channel_id,
            model = model,
            expires_at = %expires_at
        );
        true
    }

    /// 渠道在该模型上是否处于冷却中
    #[must_use]
    pub fn is_in_cooldown(&self, channel_id: i32, model: &str) -> bool {
        self.is_in_cooldown_at(channel_id, model, Utc::now())
    }

    #[must_use]
    pub fn is_in_cooldown_at(&self, channel_id: i32, model: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&(channel_id, model.to_string()))
            .is_some_and(|expires_at| now < *expires_at)
    }

    /// 清理所有已过期的条目，返回清理数量
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, expires_at| {
            let keep = now < *expires_at;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// 当前条目数（含尚未清理的过期条目）
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
