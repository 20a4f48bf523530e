//! # 渠道调度模块
//!
//! 加权随机负载均衡、候选过滤链与 `(渠道, 模型)` 冷却跟踪

pub mod balancer;
pub mod cooldown;
pub mod filters;

pub use balancer::WeightedBalancer;
pub use cooldown::CooldownTracker;
pub use filters::{
    AllowChannelTypes, ChannelFilter, ExcludeChannelIds, FilterChain, FilterOptions,
    RequireStreamSupport, SkipOnlyChat,
};
