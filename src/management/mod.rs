//! # 管理API模块
//!
//! 提供路由表重载、渠道启停与分组模型查询接口

pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod server;

pub use middleware::RequestId;
pub use routes::create_routes;
pub use server::{AppState, ManagementServer, build_router};
