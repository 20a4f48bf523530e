//! 分组与模型查询处理器

use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::error::ProxyError;
use crate::management::{response, server::AppState};

/// 分组下可用的模型列表
pub async fn get_group_models(State(state): State<AppState>, Path(group): Path<String>) -> impl IntoResponse {
    match state.registry.get_group_models(&group) {
        Ok(models) => response::success(models),
        Err(e) => response::app_error(ProxyError::from(e)),
    }
}

/// 模型到分组的反向索引
pub async fn get_models_groups(State(state): State<AppState>) -> impl IntoResponse {
    response::success(state.registry.get_models_groups())
}
