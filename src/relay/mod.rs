//! # 请求转发模块
//!
//! - `types`：请求、用量与上游错误类型
//! - `classifier`：重试与禁用判定
//! - `context`：单次请求的重试状态
//! - `error_filter`：返回客户端前的错误整理
//! - `orchestrator`：选择、分发与换渠道重试

pub mod classifier;
pub mod context;
pub mod error_filter;
pub mod orchestrator;
pub mod types;

pub use classifier::{ErrorClassifier, RetryVerdict};
pub use context::RetryContext;
pub use error_filter::{filter_upstream_error, message_with_request_id};
pub use orchestrator::{RETRY_TIMEOUT_MESSAGE, RelayOrchestrator};
pub use types::{
    DispatchFailure, DispatchOutcome, OpenAIError, RelayRequest, RelayResponse, UpstreamError, Usage,
};
