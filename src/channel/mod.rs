//! # 渠道模块
//!
//! 渠道数据模型、存储访问、路由表注册表以及渠道健康处理

pub mod health;
pub mod matcher;
pub mod registry;
pub mod store;
pub mod types;

pub use health::{ChannelHealthService, DisableOutcome};
pub use registry::{ChannelRegistry, LoadSummary, RegistryOptions, RoutingRule, RoutingSnapshot};
pub use store::{ChannelStore, DatabaseStore, GroupStore};
pub use types::{Channel, ChannelChoice, ChannelStatus, ChannelType, split_list};
