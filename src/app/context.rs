//! # 应用上下文
//!
//! 统一持有跨模块共享的服务实例，便于在测试中注入替身实现。

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::GroupRatioRegistry;
use crate::channel::{
    ChannelHealthService, ChannelRegistry, ChannelStore, DatabaseStore, GroupStore, RegistryOptions,
};
use crate::config::AppConfig;
use crate::error::Result;
use crate::linfo;
use crate::logging::{LogComponent, LogStage};
use crate::notify::{Notifier, build_notifier};
use crate::provider::ChannelDispatcher;
use crate::relay::{ErrorClassifier, RelayOrchestrator};
use crate::scheduler::CooldownTracker;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ChannelStore>,
    pub cooldowns: Arc<CooldownTracker>,
    pub registry: Arc<ChannelRegistry>,
    pub groups: Arc<GroupRatioRegistry>,
    pub notifier: Arc<dyn Notifier>,
    pub health: Arc<ChannelHealthService>,
}

impl AppContext {
    /// 基于数据库构建全部服务并完成首次加载
    pub async fn initialize(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self> {
        let store = Arc::new(DatabaseStore::new(db));
        let notifier = build_notifier(&config.notify)?;
        let context = Self::with_parts(config, store.clone(), store, notifier);

        let summary = context.registry.load().await?;
        let groups = context.groups.load().await?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "context_ready",
            "应用上下文初始化完成",
            channels = summary.channels,
            routing_groups = summary.groups,
            user_groups = groups
        );
        Ok(context)
    }

    /// 使用给定的存储与通知实现组装服务，不做加载
    pub fn with_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn ChannelStore>,
        group_store: Arc<dyn GroupStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cooldowns = Arc::new(CooldownTracker::new(config.relay.retry_cooldown_seconds));
        let registry = Arc::new(ChannelRegistry::new(
            Arc::clone(&store),
            Arc::clone(&cooldowns),
            RegistryOptions {
                default_weight: config.relay.default_channel_weight,
                case_insensitive: config.relay.model_name_case_insensitive,
            },
        ));
        let health = Arc::new(ChannelHealthService::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&notifier),
            ErrorClassifier::from_config(&config.relay),
        ));

        Self {
            groups: Arc::new(GroupRatioRegistry::new(group_store)),
            config,
            store,
            cooldowns,
            registry,
            notifier,
            health,
        }
    }

    /// 使用给定的分发器创建转发编排器
    #[must_use]
    pub fn orchestrator(&self, dispatcher: Arc<dyn ChannelDispatcher>) -> RelayOrchestrator {
        RelayOrchestrator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            dispatcher,
            Arc::clone(&self.health),
            &self.config.relay,
        )
        .with_group_authorization(Arc::clone(&self.groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChannelBuilder, GroupFixture, create_test_db, test_config};
    use sea_orm::ActiveModelTrait;

    #[tokio::test]
    async fn test_initialize_loads_channels_and_groups() {
        let db = create_test_db().await.unwrap();
        ChannelBuilder::new(1)
            .models(&["gpt-4o"])
            .to_active_model()
            .insert(&db)
            .await
            .unwrap();
        GroupFixture::new("vip")
            .ratio(2.0)
            .to_active_model()
            .insert(&db)
            .await
            .unwrap();

        let context = AppContext::initialize(Arc::new(test_config()), Arc::new(db))
            .await
            .unwrap();

        assert_eq!(context.registry.channel_count(), 1);
        assert_eq!(
            context.registry.get_matched_model_name("default", "gpt-4o").unwrap(),
            "gpt-4o"
        );
        assert!(context.groups.get_by_symbol("default").is_some());
        assert_eq!(context.groups.get_by_symbol("vip").map(|g| g.ratio), Some(2.0));
    }
}
