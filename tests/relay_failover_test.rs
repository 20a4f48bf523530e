//! # 转发重试集成测试
//!
//! 数据库存储 + 路由表 + 编排器端到端验证换渠道、冷却与自动禁用

mod common;

use async_trait::async_trait;
use common::{FakeUpstream, Inbox, SeedChannel, config, context, seed_group, setup_db};
use entity::channels;
use llm_gateway::ChannelStatus;
use llm_gateway::channel::{Channel, ChannelRegistry, ChannelStore};
use llm_gateway::provider::ChannelDispatcher;
use llm_gateway::relay::{
    DispatchFailure, DispatchOutcome, RETRY_TIMEOUT_MESSAGE, RelayRequest, UpstreamError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn rate_limited() -> UpstreamError {
    UpstreamError::upstream(429, "Rate limit reached", "rate_limit_error")
}

fn server_error() -> UpstreamError {
    UpstreamError::upstream(502, "bad gateway", "upstream_error")
}

/// 渠道重新可用的方式
enum Revive {
    /// 写回数据库并重载路由表
    Reload,
    /// 仅在运行时启用
    Runtime,
}

/// 首次转发时让另一个渠道重新可用
struct ReviveOnFirstCall {
    upstream: FakeUpstream,
    store: Arc<dyn ChannelStore>,
    registry: Arc<ChannelRegistry>,
    channel_id: i32,
    revive: Revive,
    fired: AtomicBool,
}

#[async_trait]
impl ChannelDispatcher for ReviveOnFirstCall {
    async fn dispatch(
        &self,
        channel: &Channel,
        model: &str,
        request: &RelayRequest,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            match self.revive {
                Revive::Reload => {
                    self.store
                        .update_channel_status(self.channel_id, ChannelStatus::Enabled)
                        .await
                        .unwrap();
                    self.registry.load().await.unwrap();
                }
                Revive::Runtime => {
                    assert!(self.registry.enable(self.channel_id));
                }
            }
        }
        self.upstream.dispatch(channel, model, request).await
    }
}

#[tokio::test]
async fn test_rate_limited_channel_cools_down_and_fails_over() {
    let db = setup_db().await;
    SeedChannel::new(1, "gpt-4o").priority(10).insert(&db).await;
    SeedChannel::new(2, "gpt-4o").priority(5).insert(&db).await;

    let ctx = context(db, config(3), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default().failing(1, rate_limited(), 1));
    let orchestrator = ctx.orchestrator(upstream.clone());

    let response = orchestrator
        .relay(&RelayRequest::new("req-a", "default", "gpt-4o"))
        .await
        .unwrap();
    assert_eq!(response.channel_id, 2);
    assert_eq!(response.attempts, 2);
    assert!(ctx.cooldowns.is_in_cooldown(1, "gpt-4o"));

    for i in 0..20 {
        let response = orchestrator
            .relay(&RelayRequest::new(format!("req-{i}"), "default", "gpt-4o"))
            .await
            .unwrap();
        assert_eq!(response.channel_id, 2);
    }
    assert_eq!(upstream.channels().iter().filter(|id| **id == 1).count(), 1);
}

#[tokio::test]
async fn test_attempts_capped_by_available_channels() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").insert(&db).await;
    SeedChannel::new(2, "m").insert(&db).await;

    let ctx = context(db, config(5), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(
        FakeUpstream::default()
            .failing(1, server_error(), 10)
            .failing(2, server_error(), 10),
    );

    let err = ctx
        .orchestrator(upstream.clone())
        .relay(&RelayRequest::new("req-cap", "default", "m"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code, 502);
    let mut called = upstream.channels();
    called.sort_unstable();
    assert_eq!(called, vec![1, 2]);
}

#[tokio::test]
async fn test_priority_tiers_are_walked_in_order() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").priority(10).insert(&db).await;
    SeedChannel::new(2, "m").priority(5).insert(&db).await;
    SeedChannel::new(3, "m").priority(10).insert(&db).await;
    SeedChannel::new(4, "m").priority(1).insert(&db).await;

    let ctx = context(db, config(3), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(
        FakeUpstream::default()
            .failing(1, server_error(), 1)
            .failing(2, server_error(), 1)
            .failing(3, server_error(), 1),
    );

    let response = ctx
        .orchestrator(upstream.clone())
        .relay(&RelayRequest::new("req-tiers", "default", "m"))
        .await
        .unwrap();

    let called = upstream.channels();
    assert_eq!(response.channel_id, 4);
    assert_eq!(called.len(), 4);
    let mut top: Vec<i32> = called[..2].to_vec();
    top.sort_unstable();
    assert_eq!(top, vec![1, 3]);
    assert_eq!(&called[2..], &[2, 4]);
}

#[tokio::test]
async fn test_case_insensitive_model_resolution() {
    let db = setup_db().await;
    SeedChannel::new(1, "GPT-4o").insert(&db).await;

    let mut cfg = config(0);
    cfg.relay.model_name_case_insensitive = true;
    let ctx = context(db, cfg, Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default());

    ctx.orchestrator(upstream.clone())
        .relay(&RelayRequest::new("req-ci", "default", "gpt-4O"))
        .await
        .unwrap();
    assert_eq!(upstream.models(), vec!["GPT-4o".to_string()]);
}

#[tokio::test]
async fn test_wildcard_routes_with_resolved_pattern() {
    let db = setup_db().await;
    SeedChannel::new(1, "claude-*").insert(&db).await;
    SeedChannel::new(2, "claude-3-*").insert(&db).await;

    let ctx = context(db, config(0), Arc::new(Inbox::default())).await;
    assert_eq!(
        ctx.registry
            .get_matched_model_name("default", "claude-3-opus")
            .unwrap(),
        "claude-3-*"
    );

    let upstream = Arc::new(FakeUpstream::default());
    let response = ctx
        .orchestrator(upstream)
        .relay(&RelayRequest::new("req-wc", "default", "claude-3-opus"))
        .await
        .unwrap();
    assert_eq!(response.channel_id, 2);
}

#[tokio::test]
async fn test_retry_timeout_returns_saturated_429() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").insert(&db).await;
    SeedChannel::new(2, "m").insert(&db).await;

    let mut cfg = config(3);
    cfg.relay.retry_timeout_seconds = 0;
    let ctx = context(db, cfg, Arc::new(Inbox::default())).await;
    let upstream = Arc::new(
        FakeUpstream::default()
            .failing(1, server_error(), 1)
            .failing(2, server_error(), 1)
            .with_latency(Duration::from_millis(5)),
    );

    let err = ctx
        .orchestrator(upstream.clone())
        .relay(&RelayRequest::new("req-timeout", "default", "m"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code, 429);
    assert!(err.local);
    assert!(err.message().starts_with(RETRY_TIMEOUT_MESSAGE));
    assert!(err.message().ends_with("(request id: req-timeout)"));
    assert_eq!(upstream.channels().len(), 1);
}

#[tokio::test]
async fn test_pinned_channel_is_never_retried() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").insert(&db).await;
    SeedChannel::new(2, "m").insert(&db).await;
    SeedChannel::new(3, "m")
        .status(channels::STATUS_MANUALLY_DISABLED)
        .insert(&db)
        .await;

    let ctx = context(db, config(3), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default().failing(2, server_error(), 1));
    let orchestrator = ctx.orchestrator(upstream.clone());

    let err = orchestrator
        .relay(&RelayRequest::new("req-pin", "default", "m").with_pinned_channel(2))
        .await
        .unwrap_err();
    assert_eq!(err.status_code, 502);
    assert_eq!(upstream.channels(), vec![2]);

    let err = orchestrator
        .relay(&RelayRequest::new("req-pin-off", "default", "m").with_pinned_channel(3))
        .await
        .unwrap_err();
    assert!(err.local);

    let err = orchestrator
        .relay(&RelayRequest::new("req-pin-404", "default", "m").with_pinned_channel(99))
        .await
        .unwrap_err();
    assert!(err.local);
    assert_eq!(upstream.channels(), vec![2]);
}

#[tokio::test]
async fn test_unauthorized_channel_is_disabled_and_notified() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").priority(10).insert(&db).await;
    SeedChannel::new(2, "m").priority(5).insert(&db).await;

    let inbox = Arc::new(Inbox::default());
    let ctx = context(db, config(3), inbox.clone()).await;
    let upstream = Arc::new(FakeUpstream::default().failing(
        1,
        UpstreamError::upstream(401, "Incorrect API key provided", "invalid_request_error"),
        1,
    ));

    let response = ctx
        .orchestrator(upstream)
        .relay(&RelayRequest::new("req-401", "default", "m"))
        .await
        .unwrap();
    assert_eq!(response.channel_id, 2);

    let mut notified = false;
    for _ in 0..100 {
        if !inbox.messages.lock().unwrap().is_empty() {
            notified = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(notified);
    assert!(!ctx.registry.is_channel_enabled(1));
    let stored = ctx.store.get_channel_by_id(1).await.unwrap().unwrap();
    assert_eq!(stored.status, ChannelStatus::AutoDisabled);
    assert_eq!(
        inbox.messages.lock().unwrap().clone(),
        vec!["通道「upstream-1」（#1）已被禁用".to_string()]
    );
}

#[tokio::test]
async fn test_token_group_must_be_own_or_public() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").groups("default,vip,shared").insert(&db).await;
    seed_group(&db, "vip", false).await;
    seed_group(&db, "shared", true).await;

    let ctx = context(db, config(0), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default());
    let orchestrator = ctx.orchestrator(upstream.clone());

    let mut request = RelayRequest::new("req-vip", "vip", "m");
    request.user_group = "default".into();
    let err = orchestrator.relay(&request).await.unwrap_err();
    assert_eq!(err.status_code, 403);
    assert!(err.local);
    assert!(upstream.channels().is_empty());

    let mut request = RelayRequest::new("req-shared", "shared", "m");
    request.user_group = "default".into();
    let response = orchestrator.relay(&request).await.unwrap();
    assert_eq!(response.channel_id, 1);
}

#[tokio::test]
async fn test_equal_priority_rate_limited_channel_is_avoided() {
    let db = setup_db().await;
    SeedChannel::new(1, "m1").priority(10).insert(&db).await;
    SeedChannel::new(2, "m1").priority(10).insert(&db).await;

    let ctx = context(db, config(3), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default().failing(1, rate_limited(), 100));
    let orchestrator = ctx.orchestrator(upstream.clone());

    for i in 0..30 {
        let response = orchestrator
            .relay(&RelayRequest::new(format!("req-eq-{i}"), "default", "m1"))
            .await
            .unwrap();
        assert_eq!(response.channel_id, 2);
    }
    assert!(upstream.channels().iter().filter(|id| **id == 1).count() <= 1);
}

#[rstest::rstest]
#[case::reload(Revive::Reload, channels::STATUS_MANUALLY_DISABLED)]
#[case::runtime(Revive::Runtime, channels::STATUS_ENABLED)]
#[tokio::test]
async fn test_attempt_budget_fixed_when_channel_returns_mid_retry(
    #[case] revive: Revive,
    #[case] third_status: i32,
) {
    let db = setup_db().await;
    SeedChannel::new(1, "m").insert(&db).await;
    SeedChannel::new(2, "m").insert(&db).await;
    SeedChannel::new(3, "m").status(third_status).insert(&db).await;

    let ctx = context(db, config(5), Arc::new(Inbox::default())).await;
    if matches!(revive, Revive::Runtime) {
        assert!(ctx.registry.disable(3));
    }
    assert!(!ctx.registry.is_channel_enabled(3));

    let dispatcher = Arc::new(ReviveOnFirstCall {
        upstream: FakeUpstream::default()
            .failing(1, server_error(), 10)
            .failing(2, server_error(), 10)
            .failing(3, server_error(), 10),
        store: Arc::clone(&ctx.store),
        registry: Arc::clone(&ctx.registry),
        channel_id: 3,
        revive,
        fired: AtomicBool::new(false),
    });

    let err = ctx
        .orchestrator(dispatcher.clone())
        .relay(&RelayRequest::new("req-revive", "default", "m"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code, 502);
    assert!(ctx.registry.is_channel_enabled(3));
    let called = dispatcher.upstream.channels();
    assert_eq!(called.len(), 2);
    assert_ne!(called[0], called[1]);
    assert_ne!(called[0], 3);
}

#[tokio::test]
async fn test_empty_token_group_routes_with_user_group() {
    let db = setup_db().await;
    SeedChannel::new(1, "m").groups("vip").insert(&db).await;
    seed_group(&db, "vip", false).await;

    let ctx = context(db, config(0), Arc::new(Inbox::default())).await;
    let upstream = Arc::new(FakeUpstream::default());

    let mut request = RelayRequest::new("req-empty-group", "", "m");
    request.user_group = "vip".into();
    let response = ctx.orchestrator(upstream.clone()).relay(&request).await.unwrap();

    assert_eq!(response.channel_id, 1);
    assert_eq!(upstream.channels(), vec![1]);
}
