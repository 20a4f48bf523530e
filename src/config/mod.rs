//! # 配置管理模块
//!
//! 处理应用配置加载、验证和管理

mod app_config;
mod database;
mod manager;

pub use app_config::{AppConfig, ChannelsConfig, ManagementConfig, NotifyConfig, RelayConfig};
pub use database::DatabaseConfig;
pub use manager::ConfigManager;

use std::env;
use std::path::{Path, PathBuf};

/// 解析配置文件路径：优先 `GATEWAY_CONFIG_PATH`，否则按 `RUST_ENV` 选择
#[must_use]
pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = env::var("GATEWAY_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件
pub fn load_config() -> crate::error::Result<AppConfig> {
    load_config_from(resolve_config_path())
}

/// 从指定路径加载并验证配置
pub fn load_config_from(path: impl AsRef<Path>) -> crate::error::Result<AppConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(crate::error::ProxyError::config(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let config_content = std::fs::read_to_string(path).map_err(|e| {
        crate::error::ProxyError::config_with_source(
            format!("读取配置文件失败: {}", path.display()),
            e,
        )
    })?;

    let config: AppConfig = toml::from_str(&config_content)?;

    // 验证配置的有效性
    validate_config(&config)?;

    Ok(config)
}

/// 验证配置有效性
pub(crate) fn validate_config(config: &AppConfig) -> crate::error::Result<()> {
    config.validate()
}
