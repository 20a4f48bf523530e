//! # 渠道类型定义

use entity::channels;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 上游供应商族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    OpenAI,
    Azure,
    Anthropic,
    Gemini,
    Mistral,
    Bedrock,
    Ollama,
    VertexAI,
    /// 其余按原始编号透传的类型
    Other(i32),
}

impl ChannelType {
    /// 从存储中的整数编号解析
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::OpenAI,
            3 => Self::Azure,
            14 => Self::Anthropic,
            25 => Self::Gemini,
            30 => Self::Mistral,
            32 => Self::Bedrock,
            39 => Self::Ollama,
            42 => Self::VertexAI,
            other => Self::Other(other),
        }
    }

    /// 存储用的整数编号
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::OpenAI => 1,
            Self::Azure => 3,
            Self::Anthropic => 14,
            Self::Gemini => 25,
            Self::Mistral => 30,
            Self::Bedrock => 32,
            Self::Ollama => 39,
            Self::VertexAI => 42,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Azure => write!(f, "azure"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
            Self::Mistral => write!(f, "mistral"),
            Self::Bedrock => write!(f, "bedrock"),
            Self::Ollama => write!(f, "ollama"),
            Self::VertexAI => write!(f, "vertexai"),
            Self::Other(id) => write!(f, "type_{id}"),
        }
    }
}

impl Serialize for ChannelType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for ChannelType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        i32::deserialize(deserializer).map(Self::from_i32)
    }
}

/// 渠道持久化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
    Unknown,
}

impl ChannelStatus {
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            channels::STATUS_ENABLED => Self::Enabled,
            channels::STATUS_MANUALLY_DISABLED => Self::ManuallyDisabled,
            channels::STATUS_AUTO_DISABLED => Self::AutoDisabled,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Enabled => channels::STATUS_ENABLED,
            Self::ManuallyDisabled => channels::STATUS_MANUALLY_DISABLED,
            Self::AutoDisabled => channels::STATUS_AUTO_DISABLED,
            Self::Unknown => 0,
        }
    }

    /// 是否处于任一禁用状态
    #[must_use]
    pub const fn is_disabled(self) -> bool {
        matches!(self, Self::ManuallyDisabled | Self::AutoDisabled)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::ManuallyDisabled => write!(f, "manually_disabled"),
            Self::AutoDisabled => write!(f, "auto_disabled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// 上游渠道
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i32,
    pub name: String,
    pub channel_type: ChannelType,
    #[serde(skip_serializing, default)]
    pub key: String,
    pub base_url: Option<String>,
    pub groups: Vec<String>,
    pub models: Vec<String>,
    pub weight: u32,
    pub priority: i64,
    pub status: ChannelStatus,
    pub only_chat: bool,
    /// 不允许流式输出的模型，`*` 表示全部
    pub disabled_stream: Vec<String>,
}

impl Channel {
    /// 是否允许对该模型发起流式请求
    #[must_use]
    pub fn allow_stream(&self, model: &str) -> bool {
        !self
            .disabled_stream
            .iter()
            .any(|entry| entry == "*" || entry == model)
    }

    /// 渠道是否服务于指定分组
    #[must_use]
    pub fn serves_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

impl From<channels::Model> for Channel {
    fn from(model: channels::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            channel_type: ChannelType::from_i32(model.channel_type),
            key: model.key,
            base_url: model.base_url,
            groups: split_list(&model.groups),
            models: split_list(&model.models),
            weight: model
                .weight
                .and_then(|w| u32::try_from(w).ok())
                .unwrap_or(0),
            priority: model.priority.unwrap_or(0),
            status: ChannelStatus::from_i32(model.status),
            only_chat: model.only_chat,
            disabled_stream: model
                .disabled_stream
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
        }
    }
}

/// 拆分逗号分隔列表，去除空白与空项
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// 路由快照中的渠道条目，携带运行时禁用标记
#[derive(Debug)]
pub struct ChannelChoice {
    pub channel: Arc<Channel>,
    disabled: AtomicBool,
}

impl ChannelChoice {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Arc::new(channel),
            disabled: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    #[must_use]
    pub fn weight(&self) -> u32 {
        self.channel.weight
    }
}
