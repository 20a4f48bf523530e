//! # 加权随机负载均衡
//!
//! 在同一优先级层内，跳过不存在、运行时禁用、冷却中以及被过滤的渠道，
//! 再按权重随机选出一个

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use super::cooldown::CooldownTracker;
use super::filters::{FilterChain, is_filtered};
use crate::channel::{Channel, ChannelChoice};

/// 加权负载均衡器
#[derive(Debug, Clone)]
pub struct WeightedBalancer {
    cooldowns: Arc<CooldownTracker>,
}

impl WeightedBalancer {
    #[must_use]
    pub const fn new(cooldowns: Arc<CooldownTracker>) -> Self {
        Self { cooldowns }
    }

    /// 冷却跟踪器
    #[must_use]
    pub const fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// 候选渠道是否可被选择
    #[must_use]
    pub fn is_eligible(&self, choice: &ChannelChoice, model: &str, filters: &FilterChain) -> bool {
        !choice.is_disabled()
            && !self.cooldowns.is_in_cooldown(choice.channel.id, model)
            && !is_filtered(filters, choice)
    }

    /// 从一个优先级层中选出渠道
    #[must_use]
    pub fn pick(
        &self,
        tier: &[i32],
        channels: &HashMap<i32, Arc<ChannelChoice>>,
        model: &str,
        filters: &FilterChain,
    ) -> Option<Arc<Channel>> {
        self.pick_with_rng(tier, channels, model, filters, &mut rand::thread_rng())
    }

    /// 使用指定随机源选出渠道
    pub fn pick_with_rng<R: Rng + ?Sized>(
        &self,
        tier: &[i32],
        channels: &HashMap<i32, Arc<ChannelChoice>>,
        model: &str,
        filters: &FilterChain,
        rng: &mut R,
    ) -> Option<Arc<Channel>> {
        let mut total_weight: u64 = 0;
        let mut survivors: Vec<&ChannelChoice> = Vec::with_capacity(tier.len());

        for channel_id in tier {
            let Some(choice) = channels.get(channel_id) else {
                continue;
            };
            if !self.is_eligible(choice, model, filters) {
                continue;
            }
            total_weight += u64::from(choice.weight());
            survivors.push(choice.as_ref());
        }

        match survivors.as_slice() {
            [] => None,
            [only] => Some(Arc::clone(&only.channel)),
            _ if total_weight == 0 => Some(Arc::clone(&survivors[0].channel)),
            _ => {
                let mut remaining = rng.gen_range(0..total_weight);
                for choice in &survivors {
                    let weight = u64::from(choice.weight());
                    if remaining < weight {
                        return Some(Arc::clone(&choice.channel));
                    }
                    remaining -= weight;
                }
                None
            }
        }
    }
}
