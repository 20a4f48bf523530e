//! # 路由配置
//!
//! 管理 API 路由组织

use axum::Router;
use axum::routing::{get, post};

use crate::management::handlers::{channels, models, system};
use crate::management::server::AppState;

/// 创建 `/api` 下的全部路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(system::health_handler))
        .nest("/channels", channel_routes())
        .route("/groups/{group}/models", get(models::get_group_models))
        .route("/models/groups", get(models::get_models_groups))
        .with_state(state)
}

/// 渠道管理路由
fn channel_routes() -> Router<AppState> {
    Router::new()
        .route("/reload", post(channels::reload_channels))
        .route("/{id}", get(channels::get_channel))
        .route("/{id}/enable", post(channels::enable_channel))
        .route("/{id}/disable", post(channels::disable_channel))
}
