//! # 上游分发抽象
//!
//! 供应商协议转换不在本 crate 内实现。调用方实现 `ChannelDispatcher`，
//! 把请求发送到选中的渠道并返回归一化的用量或错误。
//!
//! - `long_running`：提交后需要轮询结果的长任务适配

mod long_running;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::relay::{DispatchFailure, DispatchOutcome, RelayRequest};

pub use long_running::{JobStatus, LongRunningDispatcher, LongRunningJob, PollSettings};

/// 渠道分发器
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    /// 将请求发往渠道，`model` 为已解析的路由模型名
    async fn dispatch(
        &self,
        channel: &Channel,
        model: &str,
        request: &RelayRequest,
    ) -> Result<DispatchOutcome, DispatchFailure>;
}
