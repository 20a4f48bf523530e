//! # 配置管理器
//!
//! 统一的配置管理接口，支持手动重载和环境变量覆盖

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::AppConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo, lwarn};

const ENV_PREFIX: &str = "GATEWAY_";

/// 配置管理器
pub struct ConfigManager {
    /// 配置文件路径
    path: PathBuf,
    /// 当前配置
    config: Arc<RwLock<AppConfig>>,
    /// 环境变量覆盖映射
    env_overrides: HashMap<String, String>,
}

impl ConfigManager {
    /// 创建配置管理器
    pub fn new() -> Result<Self> {
        Self::from_file(super::resolve_config_path())
    }

    /// 从指定文件创建配置管理器
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_overrides(config_path, Self::build_env_overrides(env::vars()))
    }

    /// 使用显式给出的覆盖项创建配置管理器
    pub fn with_overrides(
        config_path: impl AsRef<Path>,
        env_overrides: HashMap<String, String>,
    ) -> Result<Self> {
        let path = config_path.as_ref().to_path_buf();
        let mut config = super::load_config_from(&path)?;

        Self::apply_env_overrides(&mut config, &env_overrides)?;
        super::validate_config(&config)?;

        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::Config,
            "config_loaded",
            "配置管理器初始化完成",
            path = %path.display(),
            env_overrides = env_overrides.len()
        );

        Ok(Self {
            path,
            config: Arc::new(RwLock::new(config)),
            env_overrides,
        })
    }

    /// 获取当前配置
    pub async fn get_config(&self) -> AppConfig {
        (*self.config.read().await).clone()
    }

    /// 手动重载配置文件并重新应用环境变量覆盖
    pub async fn reload(&self) -> Result<AppConfig> {
        let mut config = super::load_config_from(&self.path)?;
        Self::apply_env_overrides(&mut config, &self.env_overrides)?;
        super::validate_config(&config)?;

        *self.config.write().await = config.clone();
        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::Config,
            "config_reloaded",
            "手动重载配置成功"
        );
        Ok(config)
    }

    /// 构建环境变量覆盖映射
    ///
    /// 例如: `GATEWAY_RELAY_RETRY_TIMES` -> `relay.retry.times`
    pub fn build_env_overrides<I>(vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let config_key = key.strip_prefix(ENV_PREFIX)?;
                if config_key == "CONFIG_PATH" {
                    return None;
                }
                Some((config_key.to_lowercase().replace('_', "."), value))
            })
            .collect();

        ldebug!(
            "system",
            LogStage::Configuration,
            LogComponent::Config,
            "env_overrides",
            &format!("发现 {} 个环境变量覆盖", overrides.len())
        );
        overrides
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(
        config: &mut AppConfig,
        overrides: &HashMap<String, String>,
    ) -> Result<()> {
        for (path, value) in overrides {
            let shown = if path.contains("url") || path.contains("key") {
                "***"
            } else {
                value.as_str()
            };
            ldebug!(
                "system",
                LogStage::Configuration,
                LogComponent::Config,
                "apply_override",
                &format!("应用环境变量覆盖: {path} = {shown}")
            );

            Self::apply_override_to_config(config, path, value)?;
        }
        Ok(())
    }

    /// 将环境变量覆盖应用到配置对象
    fn apply_override_to_config(config: &mut AppConfig, path: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();

        match parts.as_slice() {
            ["database", "url"] => config.database.url = value.to_string(),
            ["database", "max", "connections"] => {
                config.database.max_connections = parse_value(path, value)?;
            }
            ["relay", "retry", "times"] => config.relay.retry_times = parse_value(path, value)?,
            ["relay", "retry", "timeout", "seconds"] => {
                config.relay.retry_timeout_seconds = parse_value(path, value)?;
            }
            ["relay", "retry", "cooldown", "seconds"] => {
                config.relay.retry_cooldown_seconds = parse_value(path, value)?;
            }
            ["relay", "default", "channel", "weight"] => {
                config.relay.default_channel_weight = parse_value(path, value)?;
            }
            ["relay", "model", "name", "case", "insensitive"] => {
                config.relay.model_name_case_insensitive = parse_value(path, value)?;
            }
            ["relay", "automatic", "disable", "channel"] => {
                config.relay.automatic_disable_channel = parse_value(path, value)?;
            }
            ["relay", "disable", "channel", "keywords"] => {
                config.relay.disable_channel_keywords = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            ["channels", "reload", "interval", "seconds"] => {
                config.channels.reload_interval_seconds = parse_value(path, value)?;
            }
            ["channels", "cooldown", "sweep", "interval", "seconds"] => {
                config.channels.cooldown_sweep_interval_seconds = parse_value(path, value)?;
            }
            ["management", "host"] => config.management.host = value.to_string(),
            ["management", "port"] => config.management.port = parse_value(path, value)?,
            ["notify", "webhook", "url"] => config.notify.webhook_url = Some(value.to_string()),
            _ => {
                lwarn!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Config,
                    "unknown_override",
                    &format!("未知的配置路径，忽略环境变量覆盖: {path}")
                );
            }
        }

        Ok(())
    }
}

fn parse_value<T>(path: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| {
        ProxyError::config_with_source(format!("无效的配置值 {path} = {value}"), e)
    })
}
