//! # 管理服务器
//!
//! Axum HTTP 服务器，提供路由表重载、渠道启停与查询接口

use axum::{Router, middleware};
use axum::routing::get;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::context::AppContext;
use crate::config::ManagementConfig;
use crate::management::middleware::request_id_middleware;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 管理服务器应用状态
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl AppState {
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

impl Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

/// 管理服务器
pub struct ManagementServer {
    config: ManagementConfig,
    router: Router,
}

impl ManagementServer {
    #[must_use]
    pub fn new(config: ManagementConfig, context: Arc<AppContext>) -> Self {
        let router = build_router(AppState::new(context), &config);
        Self { config, router }
    }

    /// 监听并服务，直到取消令牌被触发
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| {
                ProxyError::config_with_source(
                    format!("管理服务监听地址无效: {}:{}", self.config.host, self.config.port),
                    e,
                )
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::server_start_with_source(format!("绑定 {addr} 失败"), e))?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Management,
            "server_start",
            "管理服务已启动",
            addr = %addr
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ProxyError::server_start_with_source("管理服务异常退出", e))
    }
}

/// 构建完整路由器
pub fn build_router(state: AppState, config: &ManagementConfig) -> Router {
    let app = Router::new()
        .nest("/api", super::routes::create_routes(state))
        .route("/ping", get(super::handlers::system::ping_handler));

    app.layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors_origins)),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let parsed = origins
        .iter()
        .map(|origin| origin.parse::<axum::http::HeaderValue>())
        .collect::<std::result::Result<Vec<_>, _>>();
    match parsed {
        Ok(values) => layer.allow_origin(values),
        Err(e) => {
            lwarn!(
                "system",
                LogStage::Startup,
                LogComponent::Management,
                "cors_config_fail",
                "跨域来源配置无效，改为允许任意来源",
                error = %e
            );
            layer.allow_origin(Any)
        }
    }
}
