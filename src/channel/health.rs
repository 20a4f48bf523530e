//! # 渠道健康处理
//!
//! 上游失败命中禁用规则时，持久化禁用渠道、从路由中摘除并通知运维。
//! 同一渠道的并发禁用请求只执行一次，其余调用方共享结果。

use std::sync::Arc;
use tokio::task::JoinHandle;

use super::registry::ChannelRegistry;
use super::store::ChannelStore;
use super::types::{Channel, ChannelStatus};
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::notify::{Notifier, send_quietly};
use crate::relay::{ErrorClassifier, UpstreamError};
use crate::utils::SingleFlight;
use crate::{lerror, linfo, lwarn};

/// 一次禁用操作的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    /// 渠道已处于禁用状态，未重复通知
    AlreadyDisabled,
    NotFound,
    Failed(String),
}

/// 渠道健康服务
pub struct ChannelHealthService {
    store: Arc<dyn ChannelStore>,
    registry: Arc<ChannelRegistry>,
    notifier: Arc<dyn Notifier>,
    classifier: ErrorClassifier,
    disable_flights: SingleFlight<i32, DisableOutcome>,
}

impl ChannelHealthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChannelStore>,
        registry: Arc<ChannelRegistry>,
        notifier: Arc<dyn Notifier>,
        classifier: ErrorClassifier,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            classifier,
            disable_flights: SingleFlight::new(),
        }
    }

    /// 正在执行的禁用操作数
    #[must_use]
    pub fn disable_in_flight(&self) -> usize {
        self.disable_flights.in_flight()
    }

    /// 处理一次上游失败，命中禁用规则时禁用渠道
    pub async fn process_relay_error(
        &self,
        channel: &Channel,
        err: &UpstreamError,
    ) -> Option<DisableOutcome> {
        let rule = self.classifier.disable_reason(err, channel.channel_type)?;

        lwarn!(
            "system",
            LogStage::HealthCheck,
            LogComponent::Health,
            "channel_disabled",
            "上游错误命中禁用规则",
            channel_id = channel.id,
            channel_name = %channel.name,
            channel_type = %channel.channel_type,
            status_code = err.status_code,
            rule = rule,
            error = %err.message()
        );

        Some(
            self.disable_channel(channel.id, &channel.name, err.message(), true)
                .await,
        )
    }

    /// 在后台处理上游失败，不阻塞请求
    pub fn spawn_process_relay_error(
        self: &Arc<Self>,
        channel: Arc<Channel>,
        err: UpstreamError,
    ) -> JoinHandle<Option<DisableOutcome>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.process_relay_error(&channel, &err).await })
    }

    /// 自动禁用渠道并通知
    pub async fn disable_channel(
        &self,
        channel_id: i32,
        channel_name: &str,
        reason: &str,
        notify: bool,
    ) -> DisableOutcome {
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let notifier = Arc::clone(&self.notifier);
        let channel_name = channel_name.to_string();
        let reason = reason.to_string();

        let (outcome, shared) = self
            .disable_flights
            .run(channel_id, move || async move {
                let channel = match store.get_channel_by_id(channel_id).await {
                    Ok(Some(channel)) => channel,
                    Ok(None) => return DisableOutcome::NotFound,
                    Err(e) => return DisableOutcome::Failed(e.to_string()),
                };
                if channel.status.is_disabled() {
                    registry.disable(channel_id);
                    return DisableOutcome::AlreadyDisabled;
                }

                if let Err(e) = store
                    .update_channel_status(channel_id, ChannelStatus::AutoDisabled)
                    .await
                {
                    return DisableOutcome::Failed(e.to_string());
                }
                registry.disable(channel_id);

                if notify {
                    let subject = format!("通道「{channel_name}」（#{channel_id}）已被禁用");
                    let body = format!("{subject}，原因：{reason}");
                    send_quietly(notifier.as_ref(), &subject, &body).await;
                }
                DisableOutcome::Disabled
            })
            .await;

        match &outcome {
            DisableOutcome::Failed(message) => lerror!(
                "system",
                LogStage::HealthCheck,
                LogComponent::Health,
                "disable_channel_failed",
                "禁用渠道失败",
                channel_id = channel_id,
                error = %message
            ),
            other => linfo!(
                "system",
                LogStage::HealthCheck,
                LogComponent::Health,
                "disable_channel",
                "渠道禁用处理完成",
                channel_id = channel_id,
                outcome = ?other,
                shared = shared
            ),
        }
        outcome
    }

    /// 手动禁用渠道
    pub async fn disable_channel_manually(&self, channel_id: i32) -> Result<Channel> {
        let channel = self.require_channel(channel_id).await?;
        self.store
            .update_channel_status(channel_id, ChannelStatus::ManuallyDisabled)
            .await?;
        self.registry.disable(channel_id);

        linfo!(
            "system",
            LogStage::HealthCheck,
            LogComponent::Health,
            "disable_channel_manually",
            "渠道已手动禁用",
            channel_id = channel_id
        );
        Ok(channel)
    }

    /// 启用渠道，渠道不在当前路由表中时重新加载路由表
    pub async fn enable_channel(&self, channel_id: i32, notify: bool) -> Result<Channel> {
        let channel = self.require_channel(channel_id).await?;
        self.store
            .update_channel_status(channel_id, ChannelStatus::Enabled)
            .await?;

        if !self.registry.enable(channel_id) {
            self.registry.load().await?;
        }

        if notify {
            let subject = format!("通道「{}」（#{channel_id}）已被启用", channel.name);
            send_quietly(self.notifier.as_ref(), &subject, &subject).await;
        }

        linfo!(
            "system",
            LogStage::HealthCheck,
            LogComponent::Health,
            "enable_channel",
            "渠道已启用",
            channel_id = channel_id
        );
        Ok(channel)
    }

    async fn require_channel(&self, channel_id: i32) -> Result<Channel> {
        self.store
            .get_channel_by_id(channel_id)
            .await?
            .ok_or_else(|| ProxyError::not_found("channel", channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RegistryOptions;
    use crate::scheduler::CooldownTracker;
    use crate::testing::{ChannelBuilder, InMemoryChannelStore, RecordingNotifier};
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryChannelStore>,
        registry: Arc<ChannelRegistry>,
        notifier: Arc<RecordingNotifier>,
        service: Arc<ChannelHealthService>,
    }

    async fn fixture(channels: Vec<Channel>) -> Fixture {
        let store = Arc::new(InMemoryChannelStore::new(channels));
        let registry = Arc::new(ChannelRegistry::new(
            store.clone(),
            Arc::new(CooldownTracker::new(5)),
            RegistryOptions::default(),
        ));
        registry.load().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let service = Arc::new(ChannelHealthService::new(
            store.clone(),
            Arc::clone(&registry),
            notifier.clone(),
            ErrorClassifier::new(true, &["permission denied".to_string()]),
        ));
        Fixture {
            store,
            registry,
            notifier,
            service,
        }
    }

    #[tokio::test]
    async fn test_unauthorized_disables_and_notifies() {
        let fx = fixture(vec![ChannelBuilder::new(1).name("primary").build()]).await;
        let channel = fx.registry.get_channel(1).unwrap();

        let outcome = fx
            .service
            .process_relay_error(&channel, &UpstreamError::upstream(401, "bad key", "invalid_request_error"))
            .await;

        assert_eq!(outcome, Some(DisableOutcome::Disabled));
        assert_eq!(fx.store.status_of(1), Some(ChannelStatus::AutoDisabled));
        assert!(!fx.registry.is_channel_enabled(1));

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "通道「primary」（#1）已被禁用");
        assert!(sent[0].1.contains("原因：bad key"));
    }

    #[tokio::test]
    async fn test_transient_errors_do_not_disable() {
        let fx = fixture(vec![ChannelBuilder::new(1).build()]).await;
        let channel = fx.registry.get_channel(1).unwrap();

        let outcome = fx
            .service
            .process_relay_error(&channel, &UpstreamError::upstream(500, "boom", "server_error"))
            .await;

        assert_eq!(outcome, None);
        assert!(fx.registry.is_channel_enabled(1));
        assert!(fx.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_failures_disable_once() {
        let fx = fixture(vec![ChannelBuilder::new(1).build()]).await;
        fx.store.set_latency(Duration::from_millis(30));
        let channel = fx.registry.get_channel(1).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                fx.service.spawn_process_relay_error(
                    Arc::clone(&channel),
                    UpstreamError::upstream(401, "revoked", "authentication_error"),
                )
            })
            .collect();
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(matches!(
                outcome,
                Some(DisableOutcome::Disabled | DisableOutcome::AlreadyDisabled)
            ));
        }

        assert_eq!(fx.notifier.sent().len(), 1);
        assert_eq!(fx.store.status_updates(1), 1);
    }

    #[tokio::test]
    async fn test_already_disabled_is_not_renotified() {
        let fx = fixture(vec![ChannelBuilder::new(1).build()]).await;
        let first = fx.service.disable_channel(1, "c", "401", true).await;
        let second = fx.service.disable_channel(1, "c", "401", true).await;

        assert_eq!(first, DisableOutcome::Disabled);
        assert_eq!(second, DisableOutcome::AlreadyDisabled);
        assert_eq!(fx.notifier.sent().len(), 1);
        assert_eq!(
            fx.service.disable_channel(99, "x", "401", true).await,
            DisableOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_enable_reloads_missing_channel() {
        let fx = fixture(vec![
            ChannelBuilder::new(1).build(),
            ChannelBuilder::new(2).status(ChannelStatus::ManuallyDisabled).build(),
        ])
        .await;
        assert!(fx.registry.get_channel(2).is_none());

        fx.service.enable_channel(2, true).await.unwrap();
        assert!(fx.registry.is_channel_enabled(2));
        assert_eq!(fx.notifier.sent()[0].0, "通道「channel-2」（#2）已被启用");

        fx.service.disable_channel_manually(2).await.unwrap();
        assert!(!fx.registry.is_channel_enabled(2));
        assert_eq!(fx.store.status_of(2), Some(ChannelStatus::ManuallyDisabled));

        assert!(fx.service.enable_channel(77, false).await.is_err());
    }
}
