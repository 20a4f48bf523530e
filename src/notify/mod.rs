//! # 运维通知
//!
//! 渠道被自动禁用或恢复时通知运维人员。通知失败只记录日志，不影响请求处理。

mod webhook;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

pub use webhook::WebhookNotifier;

/// 通知发送方
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;

    /// 名称，用于日志
    fn name(&self) -> &'static str;
}

/// 只写日志的通知实现
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        linfo!(
            "system",
            LogStage::Notification,
            LogComponent::Notifier,
            "notify",
            subject,
            body = body
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// 发送通知，失败时记录告警
pub async fn send_quietly(notifier: &dyn Notifier, subject: &str, body: &str) {
    if let Err(e) = notifier.notify(subject, body).await {
        lwarn!(
            "system",
            LogStage::Notification,
            LogComponent::Notifier,
            "notify_failed",
            "通知发送失败",
            notifier = notifier.name(),
            subject = subject,
            error = %e
        );
    }
}

/// 根据配置构建通知实现，未配置 webhook 时使用日志通知
pub fn build_notifier(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    match config.webhook_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url,
            config.timeout_seconds.unwrap_or(10),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
