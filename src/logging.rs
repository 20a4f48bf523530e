//! # 日志配置模块
//!
//! 初始化 tracing 订阅器，并提供带阶段与组件标签的结构化日志宏

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStage {
    Startup,
    Shutdown,
    Configuration,
    Db,
    /// 渠道选择与路由
    Scheduling,
    /// 重试编排
    Retry,
    UpstreamRequest,
    Cooldown,
    HealthCheck,
    Notification,
    BackgroundTask,
    Response,
    Error,
    Internal,
}

impl LogStage {
    /// 阶段名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Db => "db",
            Self::Scheduling => "scheduling",
            Self::Retry => "retry",
            Self::UpstreamRequest => "upstream_request",
            Self::Cooldown => "cooldown",
            Self::HealthCheck => "health_check",
            Self::Notification => "notification",
            Self::BackgroundTask => "background_task",
            Self::Response => "response",
            Self::Error => "error",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogComponent {
    Main,
    Config,
    Database,
    Registry,
    Balancer,
    Cooldown,
    Relay,
    Health,
    Notifier,
    Quota,
    Auth,
    Scheduler,
    Management,
}

impl LogComponent {
    /// 组件名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Database => "database",
            Self::Registry => "registry",
            Self::Balancer => "balancer",
            Self::Cooldown => "cooldown",
            Self::Relay => "relay",
            Self::Health => "health",
            Self::Notifier => "notifier",
            Self::Quota => "quota",
            Self::Auth => "auth",
            Self::Scheduler => "scheduler",
            Self::Management => "management",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 info 日志
///
/// `linfo!(request_id, stage, component, operation, message, field = value, ...)`
#[macro_export]
macro_rules! linfo {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::info!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 debug 日志
#[macro_export]
macro_rules! ldebug {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::debug!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 warn 日志
#[macro_export]
macro_rules! lwarn {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::warn!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+,)?
            "{}",
            $message
        )
    };
}

/// 结构化 error 日志
#[macro_export]
macro_rules! lerror {
    ($request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $($fields:tt)+)?) => {
        ::tracing::error!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($($fields)+,)?
            "{}",
            $message
        )
    };
}

/// 初始化优化的日志系统
pub fn init_optimized_logging(log_level: Option<&String>) {
    let level = log_level.map_or("info", std::string::String::as_str);

    // 默认关闭数据库查询的详细日志
    let default_filter = format!("{level},llm_gateway=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn");

    let log_filter = env::var("RUST_LOG").unwrap_or(default_filter);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "logging_initialized",
        "日志系统初始化完成",
        level = level
    );
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                        # 标准日志级别");
    println!("  RUST_LOG=debug                       # 调试级别");
    println!("  RUST_LOG=info,sqlx::query=info       # 启用数据库查询日志");
    println!("  RUST_LOG=llm_gateway::relay=trace    # 重试编排详细追踪");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_component_names() {
        assert_eq!(LogStage::Retry.to_string(), "retry");
        assert_eq!(LogStage::UpstreamRequest.as_str(), "upstream_request");
        assert_eq!(LogComponent::Registry.to_string(), "registry");
    }

    #[test]
    fn test_macros_expand_without_subscriber() {
        let channel_id = 7;
        linfo!("req-1", LogStage::Scheduling, LogComponent::Balancer, "pick", "selected", channel_id = channel_id);
        ldebug!("req-1", LogStage::Cooldown, LogComponent::Cooldown, "set", &format!("cooldown {channel_id}"));
        lwarn!("req-1", LogStage::Retry, LogComponent::Relay, "retry", "retrying", attempt = 2, reason = %"429");
        lerror!("req-1", LogStage::Error, LogComponent::Relay, "failed", "boom");
    }
}
