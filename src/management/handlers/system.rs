//! 系统状态相关处理器

use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::management::{response, server::AppState};

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// 在进程启动时记录启动时间
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

fn uptime_seconds() -> u64 {
    START_TIME.get_or_init(Instant::now).elapsed().as_secs()
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub channels: usize,
    pub cooling_down: usize,
    pub disable_in_flight: usize,
}

/// Ping 处理器
pub async fn ping_handler() -> &'static str {
    "pong"
}

/// 网关核心状态
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    response::success(HealthSnapshot {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime_seconds(),
        channels: state.registry.channel_count(),
        cooling_down: state.cooldowns.len(),
        disable_in_flight: state.health.disable_in_flight(),
    })
}
