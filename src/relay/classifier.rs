//! # 上游错误分类
//!
//! 重试判定与禁用判定各是一张有序规则表，按顺序取第一条命中的规则。
//! 新增供应商特例时只需追加规则。

use crate::channel::ChannelType;
use crate::config::RelayConfig;

use super::types::UpstreamError;

type Predicate = fn(&UpstreamError, ChannelType) -> bool;

/// 重试规则
struct RetryRule {
    name: &'static str,
    matches: Predicate,
    retry: bool,
}

const RETRY_RULES: &[RetryRule] = &[
    RetryRule {
        name: "local_error",
        matches: |err, _| err.local,
        retry: false,
    },
    RetryRule {
        name: "rate_limited_or_redirect",
        matches: |err, _| matches!(err.status_code, 429 | 307),
        retry: true,
    },
    RetryRule {
        name: "timeout",
        matches: |err, _| matches!(err.status_code, 408 | 504 | 524),
        retry: false,
    },
    RetryRule {
        name: "anthropic_credit_balance",
        matches: |err, channel_type| {
            err.status_code == 400
                && channel_type == ChannelType::Anthropic
                && err.message().contains("Your credit balance is too low")
        },
        retry: true,
    },
    RetryRule {
        name: "bedrock_operation_not_allowed",
        matches: |err, channel_type| {
            err.status_code == 400
                && channel_type == ChannelType::Bedrock
                && err.message().contains("Operation not allowed")
        },
        retry: true,
    },
    RetryRule {
        name: "invalid_api_key_argument",
        matches: |err, channel_type| {
            err.status_code == 400
                && !matches!(channel_type, ChannelType::Anthropic | ChannelType::Bedrock)
                && err.param() == Some("INVALID_ARGUMENT")
                && err.message().contains("API key not valid")
        },
        retry: true,
    },
    RetryRule {
        name: "bad_request",
        matches: |err, _| err.status_code == 400,
        retry: false,
    },
    RetryRule {
        name: "server_error",
        matches: |err, _| err.status_code / 100 == 5,
        retry: true,
    },
    RetryRule {
        name: "success_status",
        matches: |err, _| err.status_code / 100 == 2,
        retry: false,
    },
];

/// 禁用规则
struct DisableRule {
    name: &'static str,
    matches: Predicate,
}

const DISABLE_RULES: &[DisableRule] = &[
    DisableRule {
        name: "unauthorized",
        matches: |err, _| err.status_code == 401,
    },
    DisableRule {
        name: "gemini_forbidden",
        matches: |err, channel_type| err.status_code == 403 && channel_type == ChannelType::Gemini,
    },
    DisableRule {
        name: "credential_code",
        matches: |err, _| {
            matches!(
                err.code(),
                Some("invalid_api_key" | "account_deactivated" | "billing_not_active")
            )
        },
    },
    DisableRule {
        name: "credential_type",
        matches: |err, _| {
            matches!(
                err.error_type(),
                "insufficient_quota" | "authentication_error" | "permission_error" | "forbidden"
            )
        },
    },
    DisableRule {
        name: "permission_denied_param",
        matches: |err, _| err.param() == Some("PERMISSIONDENIED"),
    },
];

/// 重试判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryVerdict {
    pub retry: bool,
    /// 命中的规则名
    pub rule: &'static str,
}

/// 错误分类器
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    automatic_disable: bool,
    disable_keywords: Vec<String>,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(automatic_disable: bool, disable_keywords: &[String]) -> Self {
        Self {
            automatic_disable,
            disable_keywords: disable_keywords
                .iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.automatic_disable_channel,
            &config.disable_channel_keywords,
        )
    }

    /// 失败是否可以换渠道重试
    #[must_use]
    pub fn retry_verdict(&self, err: &UpstreamError, channel_type: ChannelType) -> RetryVerdict {
        RETRY_RULES
            .iter()
            .find(|rule| (rule.matches)(err, channel_type))
            .map_or(
                RetryVerdict {
                    retry: true,
                    rule: "default",
                },
                |rule| RetryVerdict {
                    retry: rule.retry,
                    rule: rule.name,
                },
            )
    }

    #[must_use]
    pub fn should_retry(&self, err: &UpstreamError, channel_type: ChannelType) -> bool {
        self.retry_verdict(err, channel_type).retry
    }

    /// 失败是否需要对 `(渠道, 模型)` 施加冷却
    #[must_use]
    pub const fn should_cooldown(&self, err: &UpstreamError) -> bool {
        err.status_code == 429
    }

    /// 命中的禁用规则名，未命中返回 `None`
    #[must_use]
    pub fn disable_reason(&self, err: &UpstreamError, channel_type: ChannelType) -> Option<&'static str> {
        if !self.automatic_disable || err.local {
            return None;
        }

        if let Some(rule) = DISABLE_RULES
            .iter()
            .find(|rule| (rule.matches)(err, channel_type))
        {
            return Some(rule.name);
        }

        let message = err.message().to_lowercase();
        self.disable_keywords
            .iter()
            .any(|keyword| message.contains(keyword.as_str()))
            .then_some("keyword")
    }

    #[must_use]
    pub fn should_disable(&self, err: &UpstreamError, channel_type: ChannelType) -> bool {
        self.disable_reason(err, channel_type).is_some()
    }
}
