//! # 重试编排
//!
//! 一次逻辑请求的完整流程：解析模型、选择渠道、预扣额度、分发、
//! 失败时按分类决定冷却、禁用与换渠道重试，最终只向客户端返回最后一次失败。
//!
//! 尝试次数在请求开始时确定为 `min(重试次数 + 1, 可用渠道数)`，
//! 失败过的渠道在本请求内不会再次被选中。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::classifier::ErrorClassifier;
use super::context::RetryContext;
use super::error_filter::{filter_upstream_error, message_with_request_id};
use super::types::{DispatchOutcome, RelayRequest, RelayResponse, UpstreamError, Usage};
use crate::auth::GroupRatioRegistry;
use crate::channel::{Channel, ChannelHealthService, ChannelRegistry, ChannelStatus, ChannelStore};
use crate::config::RelayConfig;
use crate::error::RoutingError;
use crate::logging::{LogComponent, LogStage};
use crate::provider::ChannelDispatcher;
use crate::quota::{EstimatingTokenCounter, QuotaService, TokenCounter, UnlimitedQuota};
use crate::scheduler::FilterOptions;
use crate::{ldebug, lerror, linfo, lwarn};

/// 重试超时返回给客户端的提示
pub const RETRY_TIMEOUT_MESSAGE: &str = "重试超时，上游负载已饱和，请稍后再试";

/// 一次尝试的失败
#[derive(Debug)]
struct AttemptFailure {
    error: UpstreamError,
    /// 不能再换渠道重试（响应已写出或请求本身无效）
    terminal: bool,
}

impl AttemptFailure {
    const fn terminal(error: UpstreamError) -> Self {
        Self {
            error,
            terminal: true,
        }
    }
}

/// 转发编排器
pub struct RelayOrchestrator {
    registry: Arc<ChannelRegistry>,
    store: Arc<dyn ChannelStore>,
    dispatcher: Arc<dyn ChannelDispatcher>,
    quota: Arc<dyn QuotaService>,
    tokens: Arc<dyn TokenCounter>,
    health: Arc<ChannelHealthService>,
    groups: Option<Arc<GroupRatioRegistry>>,
    classifier: ErrorClassifier,
    retry_times: u32,
    timeout: Duration,
}

impl RelayOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        store: Arc<dyn ChannelStore>,
        dispatcher: Arc<dyn ChannelDispatcher>,
        health: Arc<ChannelHealthService>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            quota: Arc::new(UnlimitedQuota),
            tokens: Arc::new(EstimatingTokenCounter::default()),
            health,
            groups: None,
            classifier: ErrorClassifier::from_config(config),
            retry_times: config.retry_times,
            timeout: Duration::from_secs(config.retry_timeout_seconds),
        }
    }

    #[must_use]
    pub fn with_quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = quota;
        self
    }

    #[must_use]
    pub fn with_token_counter(mut self, tokens: Arc<dyn TokenCounter>) -> Self {
        self.tokens = tokens;
        self
    }

    /// 转发前校验令牌分组，未设置时信任请求中的分组
    #[must_use]
    pub fn with_group_authorization(mut self, groups: Arc<GroupRatioRegistry>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// 转发一次逻辑请求
    pub async fn relay(&self, request: &RelayRequest) -> Result<RelayResponse, UpstreamError> {
        let routed = self.authorize(request)?;
        self.relay_in_group(&routed).await
    }

    /// 分组已确定后的转发流程
    async fn relay_in_group(&self, request: &RelayRequest) -> Result<RelayResponse, UpstreamError> {
        let request_id = request.request_id.as_str();
        let model = self
            .registry
            .get_matched_model_name(&request.group, &request.model)
            .map_err(|e| Self::routing_failure(request, &request.model, &e))?;

        let prompt_tokens = self.tokens.count_prompt(request).map_err(|e| {
            filter_upstream_error(&UpstreamError::local(400, e.to_string(), "token_error"), request_id)
        })?;

        if let Some(channel_id) = request.pinned_channel_id {
            return self
                .relay_pinned(request, channel_id, &model, prompt_tokens)
                .await;
        }

        let options = FilterOptions {
            skip_only_chat: request.skip_only_chat,
            allowed_types: request.allowed_types.clone(),
            stream_model: request.stream.then(|| model.clone()),
        };
        let total_channels =
            self.registry
                .count_available_channels(&request.group, &model, &options.build(&HashSet::new()));
        let mut ctx = RetryContext::new(self.retry_times, total_channels, self.timeout);

        let mut channel = self
            .registry
            .next_by_validated_model(&request.group, &model, &options.build(ctx.excluded()))
            .map_err(|e| Self::routing_failure(request, &model, &e))?;

        ctx.begin_attempt();
        let mut last = match self.attempt(request, &channel, &model, prompt_tokens).await {
            Ok((usage, outcome)) => return Ok(Self::respond(&channel, usage, ctx.attempts(), outcome)),
            Err(failure) => failure,
        };
        self.record_failure(request, &channel, &model, &last.error);

        if self.should_stop(&channel, &last) {
            return Err(filter_upstream_error(&last.error, request_id));
        }

        lwarn!(
            request_id,
            LogStage::Retry,
            LogComponent::Relay,
            "retry_start",
            "首次尝试失败，开始重试",
            group = %request.group,
            model = %model,
            channel_id = channel.id,
            status_code = last.error.status_code,
            max_retries = ctx.max_retries(),
            configured_retries = ctx.configured_retries(),
            total_channels = ctx.total_channels_at_start()
        );

        while ctx.has_budget() {
            ctx.exclude(channel.id);

            if ctx.is_timed_out() {
                lwarn!(
                    request_id,
                    LogStage::Retry,
                    LogComponent::Relay,
                    "retry_timeout",
                    "重试超时",
                    attempts = ctx.attempts(),
                    elapsed_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
                    timeout_secs = ctx.timeout().as_secs()
                );
                return Err(UpstreamError::local(
                    429,
                    message_with_request_id(RETRY_TIMEOUT_MESSAGE, request_id),
                    "system_error",
                ));
            }

            let next = match self.registry.next_by_validated_model(
                &request.group,
                &model,
                &options.build(ctx.excluded()),
            ) {
                Ok(next) => next,
                Err(e) => {
                    lwarn!(
                        request_id,
                        LogStage::Retry,
                        LogComponent::Relay,
                        "retry_provider_error",
                        "没有可供重试的渠道",
                        attempts = ctx.attempts(),
                        excluded = ctx.excluded().len(),
                        error = %e
                    );
                    break;
                }
            };

            let attempt = ctx.begin_attempt();
            let remaining = self.registry.count_available_channels(
                &request.group,
                &model,
                &options.build(ctx.excluded()),
            );
            lwarn!(
                request_id,
                LogStage::Retry,
                LogComponent::Relay,
                "retry_attempt",
                "切换渠道重试",
                attempt = attempt,
                max_attempts = ctx.max_attempts(),
                channel_id = next.id,
                channel_name = %next.name,
                remaining_channels = remaining
            );

            match self.attempt(request, &next, &model, prompt_tokens).await {
                Ok((usage, outcome)) => {
                    linfo!(
                        request_id,
                        LogStage::Retry,
                        LogComponent::Relay,
                        "retry_success",
                        "重试成功",
                        attempt = attempt,
                        channel_id = next.id
                    );
                    return Ok(Self::respond(&next, usage, ctx.attempts(), outcome));
                }
                Err(failure) => {
                    lwarn!(
                        request_id,
                        LogStage::Retry,
                        LogComponent::Relay,
                        "retry_failed",
                        "重试失败",
                        attempt = attempt,
                        channel_id = next.id,
                        status_code = failure.error.status_code,
                        error = %failure.error.message()
                    );
                    self.record_failure(request, &next, &model, &failure.error);
                    channel = next;
                    last = failure;

                    if self.should_stop(&channel, &last) {
                        lwarn!(
                            request_id,
                            LogStage::Retry,
                            LogComponent::Relay,
                            "retry_stop_condition",
                            "错误不可重试，停止重试",
                            attempt = attempt,
                            status_code = last.error.status_code
                        );
                        return Err(filter_upstream_error(&last.error, request_id));
                    }
                }
            }
        }

        lerror!(
            request_id,
            LogStage::Retry,
            LogComponent::Relay,
            "retry_exhausted",
            "重试次数耗尽",
            attempts = ctx.attempts(),
            max_attempts = ctx.max_attempts(),
            last_channel_id = channel.id,
            status_code = last.error.status_code
        );
        Err(filter_upstream_error(&last.error, request_id))
    }

    /// 指定渠道的请求：只尝试一次
    async fn relay_pinned(
        &self,
        request: &RelayRequest,
        channel_id: i32,
        model: &str,
        prompt_tokens: u32,
    ) -> Result<RelayResponse, UpstreamError> {
        let channel = match self.store.get_channel_by_id(channel_id).await {
            Ok(Some(channel)) if channel.status == ChannelStatus::Enabled => Arc::new(channel),
            Ok(Some(_)) => {
                return Err(Self::routing_failure(
                    request,
                    model,
                    &RoutingError::ChannelDisabled { channel_id },
                ));
            }
            Ok(None) => {
                return Err(Self::routing_failure(
                    request,
                    model,
                    &RoutingError::InvalidChannelId { channel_id },
                ));
            }
            Err(e) => {
                return Err(filter_upstream_error(
                    &UpstreamError::local(500, e.to_string(), "one_hub_error"),
                    &request.request_id,
                ));
            }
        };

        ldebug!(
            request.request_id,
            LogStage::Scheduling,
            LogComponent::Relay,
            "pinned_channel",
            "使用指定渠道",
            channel_id = channel_id
        );

        match self.attempt(request, &channel, model, prompt_tokens).await {
            Ok((usage, outcome)) => Ok(Self::respond(&channel, usage, 1, outcome)),
            Err(failure) => {
                self.record_failure(request, &channel, model, &failure.error);
                Err(filter_upstream_error(&failure.error, &request.request_id))
            }
        }
    }

    /// 单次尝试：预扣、分发、结算或退回
    async fn attempt(
        &self,
        request: &RelayRequest,
        channel: &Channel,
        model: &str,
        prompt_tokens: u32,
    ) -> Result<(Usage, DispatchOutcome), AttemptFailure> {
        let reservation = self
            .quota
            .reserve(request, model, prompt_tokens)
            .await
            .map_err(|e| {
                AttemptFailure::terminal(UpstreamError::local(
                    403,
                    e.to_string(),
                    "insufficient_user_quota",
                ))
            })?;

        match self.dispatcher.dispatch(channel, model, request).await {
            Ok(outcome) => {
                let mut usage = outcome
                    .usage
                    .unwrap_or_else(|| Usage::new(prompt_tokens, 0));
                if usage.completion_tokens == 0 && !outcome.text.is_empty() {
                    usage = Usage::new(usage.prompt_tokens, self.tokens.count_text(model, &outcome.text));
                }

                if let Err(e) = self.quota.settle(&reservation, &usage, request.stream).await {
                    lwarn!(
                        request.request_id,
                        LogStage::Response,
                        LogComponent::Quota,
                        "settle_failed",
                        "用量结算失败",
                        channel_id = channel.id,
                        error = %e
                    );
                }
                Ok((usage, outcome))
            }
            Err(failure) => {
                if let Err(e) = self.quota.reverse(&reservation).await {
                    lwarn!(
                        request.request_id,
                        LogStage::Response,
                        LogComponent::Quota,
                        "reverse_failed",
                        "退回预扣额度失败",
                        channel_id = channel.id,
                        error = %e
                    );
                }
                Err(AttemptFailure {
                    error: failure.error,
                    terminal: failure.committed,
                })
            }
        }
    }

    /// 记录失败：429 冷却 `(渠道, 模型)`，并在后台做禁用判定
    fn record_failure(&self, request: &RelayRequest, channel: &Arc<Channel>, model: &str, err: &UpstreamError) {
        if self.classifier.should_cooldown(err)
            && self.registry.cooldowns().set_cooldown(channel.id, model)
        {
            lwarn!(
                request.request_id,
                LogStage::Cooldown,
                LogComponent::Cooldown,
                "channel_cooldown",
                "渠道进入冷却",
                channel_id = channel.id,
                model = %model
            );
        }

        if !err.local {
            drop(
                self.health
                    .spawn_process_relay_error(Arc::clone(channel), err.clone()),
            );
        }
    }

    fn should_stop(&self, channel: &Channel, failure: &AttemptFailure) -> bool {
        failure.terminal || !self.classifier.should_retry(&failure.error, channel.channel_type)
    }

    /// 确定路由分组与倍率，返回写入后的请求
    fn authorize(&self, request: &RelayRequest) -> Result<RelayRequest, UpstreamError> {
        let Some(groups) = &self.groups else {
            return Ok(RelayRequest {
                group: request.effective_group().to_string(),
                ..request.clone()
            });
        };

        match groups.authorize(&request.user_group, Some(&request.group)) {
            Ok(grant) => {
                ldebug!(
                    request.request_id,
                    LogStage::Scheduling,
                    LogComponent::Auth,
                    "group_authorized",
                    "分组授权通过",
                    user_group = %grant.user_group,
                    token_group = %grant.token_group,
                    ratio = grant.ratio
                );
                Ok(RelayRequest {
                    group: grant.token_group,
                    group_ratio: grant.ratio,
                    ..request.clone()
                })
            }
            Err(e) => {
                lwarn!(
                    request.request_id,
                    LogStage::Scheduling,
                    LogComponent::Auth,
                    "group_forbidden",
                    "分组授权失败",
                    user_group = %request.user_group,
                    token_group = %request.group,
                    error = %e
                );
                Err(filter_upstream_error(
                    &UpstreamError::local(403, e.to_string(), "group_forbidden"),
                    &request.request_id,
                ))
            }
        }
    }

    fn routing_failure(request: &RelayRequest, model: &str, err: &RoutingError) -> UpstreamError {
        lwarn!(
            request.request_id,
            LogStage::Scheduling,
            LogComponent::Relay,
            "routing_failed",
            "渠道选择失败",
            group = %request.group,
            model = %model,
            error = %err
        );
        filter_upstream_error(
            &UpstreamError::from_routing(err, &request.group, model),
            &request.request_id,
        )
    }

    fn respond(channel: &Channel, usage: Usage, attempts: u32, outcome: DispatchOutcome) -> RelayResponse {
        RelayResponse {
            channel_id: channel.id,
            usage,
            attempts,
            body: outcome.body,
        }
    }
}
