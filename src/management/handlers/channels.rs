//! # 渠道管理处理器
//!
//! 路由表重载与渠道启用、禁用

use axum::Extension;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::logging::{LogComponent, LogStage};
use crate::management::middleware::RequestId;
use crate::management::{response, server::AppState};
use crate::{lerror, linfo};

#[derive(Debug, Serialize)]
pub struct ChannelView {
    #[serde(flatten)]
    pub channel: Channel,
    /// 是否在当前路由表中且未被运行时禁用
    pub routable: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnableQuery {
    /// 是否发送启用通知
    #[serde(default)]
    pub notify: bool,
}

/// 从存储全量重载路由表
pub async fn reload_channels(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> impl IntoResponse {
    match state.registry.load().await {
        Ok(summary) => {
            linfo!(
                request_id.as_str(),
                LogStage::Configuration,
                LogComponent::Management,
                "reload_channels",
                "管理接口触发路由表重载",
                channels = summary.channels
            );
            response::success_with_message(summary, "路由表已重载")
        }
        Err(e) => {
            lerror!(
                request_id.as_str(),
                LogStage::Configuration,
                LogComponent::Management,
                "reload_channels_failed",
                "路由表重载失败",
                error = %e
            );
            response::app_error(e)
        }
    }
}

/// 查询渠道详情
pub async fn get_channel(State(state): State<AppState>, Path(channel_id): Path<i32>) -> impl IntoResponse {
    match state.store.get_channel_by_id(channel_id).await {
        Ok(Some(channel)) => response::success(ChannelView {
            routable: state.registry.is_channel_enabled(channel_id),
            channel,
        }),
        Ok(None) => response::error(
            StatusCode::NOT_FOUND,
            "CHANNEL_NOT_FOUND",
            &format!("渠道 {channel_id} 不存在"),
        ),
        Err(e) => response::app_error(e),
    }
}

/// 启用渠道
pub async fn enable_channel(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(channel_id): Path<i32>,
    Query(query): Query<EnableQuery>,
) -> impl IntoResponse {
    linfo!(
        request_id.as_str(),
        LogStage::HealthCheck,
        LogComponent::Management,
        "enable_channel",
        "管理接口启用渠道",
        channel_id = channel_id,
        notify = query.notify
    );
    match state.health.enable_channel(channel_id, query.notify).await {
        Ok(channel) => response::success_with_message(channel, "渠道已启用"),
        Err(e) => response::app_error(e),
    }
}

/// 手动禁用渠道
pub async fn disable_channel(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(channel_id): Path<i32>,
) -> impl IntoResponse {
    linfo!(
        request_id.as_str(),
        LogStage::HealthCheck,
        LogComponent::Management,
        "disable_channel",
        "管理接口手动禁用渠道",
        channel_id = channel_id
    );
    match state.health.disable_channel_manually(channel_id).await {
        Ok(channel) => response::success_with_message(channel, "渠道已禁用"),
        Err(e) => response::app_error(e),
    }
}
