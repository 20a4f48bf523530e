//! # 应用配置结构定义

use serde::{Deserialize, Serialize};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 数据库配置
    pub database: super::DatabaseConfig,
    /// 重试与渠道健康策略
    pub relay: RelayConfig,
    /// 渠道注册表刷新配置
    pub channels: ChannelsConfig,
    /// 管理接口配置
    pub management: ManagementConfig,
    /// 运维通知配置
    pub notify: NotifyConfig,
}

/// 重试编排与自动禁用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 首次尝试之外的最大重试次数
    pub retry_times: u32,
    /// 单个请求重试的总时长上限（秒）
    pub retry_timeout_seconds: u64,
    /// 429 后渠道在该模型上的冷却时长（秒），0 表示关闭冷却
    pub retry_cooldown_seconds: u64,
    /// 渠道权重为 0 或缺省时使用的默认权重
    pub default_channel_weight: u32,
    /// 模型名是否大小写不敏感匹配
    pub model_name_case_insensitive: bool,
    /// 是否根据上游错误自动禁用渠道
    pub automatic_disable_channel: bool,
    /// 命中即自动禁用渠道的错误关键字（大小写不敏感）
    pub disable_channel_keywords: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry_times: 3,
            retry_timeout_seconds: 60,
            retry_cooldown_seconds: 5,
            default_channel_weight: 1,
            model_name_case_insensitive: false,
            automatic_disable_channel: true,
            disable_channel_keywords: default_disable_keywords(),
        }
    }
}

fn default_disable_keywords() -> Vec<String> {
    [
        "Your credit balance is too low",
        "This organization has been disabled",
        "You exceeded your current quota",
        "The security token included in the request is invalid",
        "Your account is not authorized",
        "Permission denied",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// 渠道注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// 定时全量重载间隔（秒），0 表示仅手动重载
    pub reload_interval_seconds: u64,
    /// 冷却表过期清理间隔（秒）
    pub cooldown_sweep_interval_seconds: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            reload_interval_seconds: 0,
            cooldown_sweep_interval_seconds: 3600,
        }
    }
}

/// 管理接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 允许的跨域来源
    pub cors_origins: Vec<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// 通知配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook 地址，未配置时仅写日志
    pub webhook_url: Option<String>,
    /// 发送超时（秒）
    pub timeout_seconds: Option<u64>,
}

impl AppConfig {
    /// 管理服务监听地址
    #[must_use]
    pub fn management_addr(&self) -> String {
        format!("{}:{}", self.management.host, self.management.port)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> crate::error::Result<()> {
        crate::ensure_config!(!self.database.url.is_empty(), "Database URL cannot be empty");
        crate::ensure_config!(
            self.database.max_connections > 0,
            "Database max_connections must be greater than 0"
        );
        crate::ensure_config!(
            self.relay.retry_timeout_seconds > 0,
            "relay.retry_timeout_seconds must be greater than 0"
        );
        crate::ensure_config!(
            self.relay.default_channel_weight > 0,
            "relay.default_channel_weight must be greater than 0"
        );
        crate::ensure_config!(
            self.channels.cooldown_sweep_interval_seconds > 0,
            "channels.cooldown_sweep_interval_seconds must be greater than 0"
        );
        crate::ensure_config!(self.management.port > 0, "management.port must be greater than 0");
        if let Some(url) = &self.notify.webhook_url {
            crate::ensure_config!(
                url.starts_with("http://") || url.starts_with("https://"),
                "notify.webhook_url 必须是 http(s) 地址: {}",
                url
            );
        }
        Ok(())
    }
}
