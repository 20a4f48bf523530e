//! # 转发请求与结果类型

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::channel::ChannelType;
use crate::error::RoutingError;

/// 一次逻辑请求的转发上下文
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub request_id: String,
    /// 用户所属分组
    pub user_group: String,
    /// 令牌分组，路由与计费使用该分组，为空时使用用户分组
    pub group: String,
    /// 分组计费倍率，授权通过后写入
    pub group_ratio: f64,
    /// 客户端请求的模型名
    pub model: String,
    pub stream: bool,
    /// 指定渠道（调试用），指定后不会重试
    pub pinned_channel_id: Option<i32>,
    pub skip_only_chat: bool,
    pub allowed_types: Option<Vec<ChannelType>>,
    /// 用于估算提示词 token 的文本
    pub prompt: String,
    /// 透传给上游适配层的请求体
    pub body: Value,
}

impl Default for RelayRequest {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            user_group: String::new(),
            group: String::new(),
            group_ratio: 1.0,
            model: String::new(),
            stream: false,
            pinned_channel_id: None,
            skip_only_chat: false,
            allowed_types: None,
            prompt: String::new(),
            body: Value::Null,
        }
    }
}

impl RelayRequest {
    pub fn new(request_id: impl Into<String>, group: impl Into<String>, model: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            request_id: request_id.into(),
            user_group: group.clone(),
            group,
            model: model.into(),
            ..Self::default()
        }
    }

    /// 实际用于路由的分组：令牌分组，未指定时为用户分组
    #[must_use]
    pub fn effective_group(&self) -> &str {
        if self.group.is_empty() {
            &self.user_group
        } else {
            &self.group
        }
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    #[must_use]
    pub const fn with_pinned_channel(mut self, channel_id: i32) -> Self {
        self.pinned_channel_id = Some(channel_id);
        self
    }

    #[must_use]
    pub fn with_allowed_types(mut self, types: Vec<ChannelType>) -> Self {
        self.allowed_types = Some(types);
        self
    }

    #[must_use]
    pub const fn with_skip_only_chat(mut self, skip: bool) -> Self {
        self.skip_only_chat = skip;
        self
    }
}

/// token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// 上游成功返回的结果
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// 上游报告的用量，未报告时为 `None`
    pub usage: Option<Usage>,
    /// 流式输出累积的文本
    pub text: String,
    pub body: Value,
}

/// 上游失败
#[derive(Debug, Clone)]
pub struct DispatchFailure {
    pub error: UpstreamError,
    /// 响应已开始写给客户端，此后不能再切换渠道
    pub committed: bool,
}

impl From<UpstreamError> for DispatchFailure {
    fn from(error: UpstreamError) -> Self {
        Self {
            error,
            committed: false,
        }
    }
}

/// OpenAI 风格的错误体
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAIError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// 带状态码的上游或本地错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub status_code: u16,
    pub error: OpenAIError,
    /// 网关本地产生的错误，不重试也不触发禁用
    pub local: bool,
}

impl UpstreamError {
    pub fn upstream(status_code: u16, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            status_code,
            error: OpenAIError {
                message: message.into(),
                error_type: error_type.into(),
                param: None,
                code: None,
            },
            local: false,
        }
    }

    pub fn local(status_code: u16, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::upstream(status_code, message, error_type)
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.error.param = Some(param.into());
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.error.message
    }

    #[must_use]
    pub fn error_type(&self) -> &str {
        &self.error.error_type
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error.code.as_deref()
    }

    #[must_use]
    pub fn param(&self) -> Option<&str> {
        self.error.param.as_deref()
    }

    /// 序列化为 `{"error": {...}}`
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "error": self.error })
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status_code, self.error.message)
    }
}

impl std::error::Error for UpstreamError {}

impl UpstreamError {
    /// 渠道选择失败对应的本地错误
    #[must_use]
    pub fn from_routing(err: &RoutingError, group: &str, model: &str) -> Self {
        let message = match err {
            RoutingError::DatabaseConsistencyBroken { .. } => {
                "数据库一致性已被破坏，请联系管理员".to_string()
            }
            RoutingError::ModelNotFound { .. } | RoutingError::ModelNotFoundInGroup { .. } => {
                format!("当前分组 {group} 下对于模型 {model} 无可用渠道")
            }
            capacity if capacity.is_capacity_exhausted() => {
                format!("当前分组 {group} 下对于模型 {model} 无可用渠道")
            }
            other => other.to_string(),
        };
        Self::local(503, message, "one_hub_error")
    }
}

/// 一次逻辑请求的最终结果
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub channel_id: i32,
    pub usage: Usage,
    pub attempts: u32,
    pub body: Value,
}
