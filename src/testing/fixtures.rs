//! # 测试数据 Fixtures
//!
//! 提供渠道与分组的测试数据构建器

use chrono::Utc;
use entity::{channels, user_groups};
use sea_orm::Set;

use crate::channel::{Channel, ChannelStatus, ChannelType};

/// 渠道测试数据构建器
///
/// 默认：分组 `default`，模型 `m1`，权重 1，优先级 0，启用状态
#[derive(Debug, Clone)]
pub struct ChannelBuilder {
    channel: Channel,
}

impl ChannelBuilder {
    pub fn new(id: i32) -> Self {
        Self {
            channel: Channel {
                id,
                name: format!("channel-{id}"),
                channel_type: ChannelType::OpenAI,
                key: format!("sk-test-{id}"),
                base_url: None,
                groups: vec!["default".to_string()],
                models: vec!["m1".to_string()],
                weight: 1,
                priority: 0,
                status: ChannelStatus::Enabled,
                only_chat: false,
                disabled_stream: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.channel.name = name.to_string();
        self
    }

    pub const fn channel_type(mut self, channel_type: ChannelType) -> Self {
        self.channel.channel_type = channel_type;
        self
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.channel.groups = groups.iter().map(ToString::to_string).collect();
        self
    }

    pub fn models(mut self, models: &[&str]) -> Self {
        self.channel.models = models.iter().map(ToString::to_string).collect();
        self
    }

    pub const fn weight(mut self, weight: u32) -> Self {
        self.channel.weight = weight;
        self
    }

    pub const fn priority(mut self, priority: i64) -> Self {
        self.channel.priority = priority;
        self
    }

    pub const fn status(mut self, status: ChannelStatus) -> Self {
        self.channel.status = status;
        self
    }

    pub const fn only_chat(mut self, only_chat: bool) -> Self {
        self.channel.only_chat = only_chat;
        self
    }

    pub fn disabled_stream(mut self, models: &[&str]) -> Self {
        self.channel.disabled_stream = models.iter().map(ToString::to_string).collect();
        self
    }

    pub fn build(self) -> Channel {
        self.channel
    }

    /// 转换为 ActiveModel（用于写入数据库）
    pub fn to_active_model(self) -> channels::ActiveModel {
        let channel = self.channel;
        let now = Utc::now().naive_utc();
        channels::ActiveModel {
            id: Set(channel.id),
            channel_type: Set(channel.channel_type.as_i32()),
            name: Set(channel.name),
            key: Set(channel.key),
            base_url: Set(channel.base_url),
            groups: Set(channel.groups.join(",")),
            models: Set(channel.models.join(",")),
            weight: Set(Some(i32::try_from(channel.weight).unwrap_or(i32::MAX))),
            priority: Set(Some(channel.priority)),
            status: Set(channel.status.as_i32()),
            only_chat: Set(channel.only_chat),
            disabled_stream: Set(
                (!channel.disabled_stream.is_empty()).then(|| channel.disabled_stream.join(","))
            ),
            created_at: Set(now),
            updated_at: Set(now),
        }
    }
}

/// 分组测试数据
pub struct GroupFixture {
    pub symbol: String,
    pub ratio: f64,
    pub public: bool,
}

impl GroupFixture {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ratio: 1.0,
            public: false,
        }
    }

    pub const fn ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    pub const fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn to_active_model(self) -> user_groups::ActiveModel {
        let now = Utc::now().naive_utc();
        user_groups::ActiveModel {
            name: Set(self.symbol.clone()),
            symbol: Set(self.symbol),
            ratio: Set(self.ratio),
            public: Set(self.public),
            enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
    }
}
