//! # LLM Gateway
//!
//! 大模型 API 网关核心：渠道注册与路由表、加权负载均衡、
//! `(渠道, 模型)` 冷却、失败重试编排以及渠道自动禁用。

pub mod app;
pub mod auth;
pub mod channel;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod management;
pub mod notify;
pub mod provider;
pub mod quota;
pub mod relay;
pub mod scheduler;
pub mod testing;
pub mod utils;

pub use app::AppContext;
pub use channel::{Channel, ChannelRegistry, ChannelStatus, ChannelType};
pub use config::AppConfig;
pub use error::{ProxyError, Result, RoutingError};
pub use relay::{RelayOrchestrator, RelayRequest, RelayResponse, UpstreamError};
pub use scheduler::CooldownTracker;
