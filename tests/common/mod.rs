//! 集成测试共用的数据库与上游替身

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use entity::{channels, user_groups};
use llm_gateway::channel::{Channel, DatabaseStore};
use llm_gateway::config::AppConfig;
use llm_gateway::notify::Notifier;
use llm_gateway::provider::ChannelDispatcher;
use llm_gateway::relay::{DispatchFailure, DispatchOutcome, RelayRequest, UpstreamError, Usage};
use llm_gateway::{AppContext, Result};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

/// 待写入的渠道
pub struct SeedChannel {
    pub id: i32,
    pub name: String,
    pub groups: String,
    pub models: String,
    pub priority: i64,
    pub weight: i32,
    pub status: i32,
}

impl SeedChannel {
    pub fn new(id: i32, models: &str) -> Self {
        Self {
            id,
            name: format!("upstream-{id}"),
            groups: "default".into(),
            models: models.into(),
            priority: 0,
            weight: 1,
            status: channels::STATUS_ENABLED,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn groups(mut self, groups: &str) -> Self {
        self.groups = groups.into();
        self
    }

    pub fn status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }

    pub async fn insert(self, db: &DatabaseConnection) {
        let now = Utc::now().naive_utc();
        channels::ActiveModel {
            id: Set(self.id),
            channel_type: Set(1),
            name: Set(self.name),
            key: Set(format!("sk-{}", self.id)),
            base_url: Set(None),
            groups: Set(self.groups),
            models: Set(self.models),
            weight: Set(Some(self.weight)),
            priority: Set(Some(self.priority)),
            status: Set(self.status),
            only_chat: Set(false),
            disabled_stream: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
    }
}

/// 写入一个启用的用户分组
pub async fn seed_group(db: &DatabaseConnection, symbol: &str, public: bool) {
    let now = Utc::now().naive_utc();
    user_groups::ActiveModel {
        symbol: Set(symbol.to_string()),
        name: Set(symbol.to_string()),
        ratio: Set(1.0),
        public: Set(public),
        enabled: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap();
}

/// 记录通知内容
#[derive(Default)]
pub struct Inbox {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for Inbox {
    async fn notify(&self, subject: &str, _body: &str) -> Result<()> {
        self.messages.lock().unwrap().push(subject.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "inbox"
    }
}

/// 按渠道预设失败的上游，未预设时返回成功
#[derive(Default)]
pub struct FakeUpstream {
    failures: Mutex<HashMap<i32, VecDeque<UpstreamError>>>,
    pub calls: Mutex<Vec<(i32, String)>>,
    pub latency: Duration,
}

impl FakeUpstream {
    pub fn failing(self, channel_id: i32, error: UpstreamError, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .extend(std::iter::repeat_n(error, times));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn channels(&self) -> Vec<i32> {
        self.calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn models(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl ChannelDispatcher for FakeUpstream {
    async fn dispatch(
        &self,
        channel: &Channel,
        model: &str,
        _request: &RelayRequest,
    ) -> std::result::Result<DispatchOutcome, DispatchFailure> {
        self.calls.lock().unwrap().push((channel.id, model.to_string()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&channel.id)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(DispatchOutcome {
                usage: Some(Usage::new(3, 7)),
                ..DispatchOutcome::default()
            }),
        }
    }
}

/// 基于数据库构建应用上下文并加载路由表与分组，`default` 分组由迁移写入
pub async fn context(db: DatabaseConnection, config: AppConfig, notifier: Arc<dyn Notifier>) -> AppContext {
    let store = Arc::new(DatabaseStore::new(Arc::new(db)));
    let context = AppContext::with_parts(Arc::new(config), store.clone(), store, notifier);
    context.registry.load().await.unwrap();
    context.groups.load().await.unwrap();
    context
}

pub fn config(retry_times: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".into();
    config.relay.retry_times = retry_times;
    config.relay.retry_cooldown_seconds = 60;
    config
}
