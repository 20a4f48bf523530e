//! # 长任务轮询
//!
//! 部分上游（如视频生成）提交后返回操作 id，需要按固定间隔查询直到完成。
//! 轮询次数有上限，超过后按网关超时处理。

use async_trait::async_trait;
use std::time::Duration;

use super::ChannelDispatcher;
use crate::channel::Channel;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::relay::{DispatchFailure, DispatchOutcome, RelayRequest, UpstreamError};

/// 长任务的一次查询结果
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Done(DispatchOutcome),
}

/// 长任务上游
#[async_trait]
pub trait LongRunningJob: Send + Sync {
    /// 提交任务，返回操作 id
    async fn submit(
        &self,
        channel: &Channel,
        model: &str,
        request: &RelayRequest,
    ) -> Result<String, UpstreamError>;

    /// 查询任务状态，必须使用提交时的同一渠道
    async fn poll(&self, channel: &Channel, operation: &str) -> Result<JobStatus, UpstreamError>;
}

/// 轮询参数
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_polls: 60,
        }
    }
}

/// 将长任务包装为普通分发器
#[derive(Debug, Clone)]
pub struct LongRunningDispatcher<J> {
    job: J,
    settings: PollSettings,
}

impl<J: LongRunningJob> LongRunningDispatcher<J> {
    pub const fn new(job: J, settings: PollSettings) -> Self {
        Self { job, settings }
    }
}

#[async_trait]
impl<J: LongRunningJob> ChannelDispatcher for LongRunningDispatcher<J> {
    async fn dispatch(
        &self,
        channel: &Channel,
        model: &str,
        request: &RelayRequest,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let operation = self.job.submit(channel, model, request).await?;

        for poll in 1..=self.settings.max_polls {
            if let JobStatus::Done(outcome) = self.job.poll(channel, &operation).await? {
                ldebug!(
                    request.request_id,
                    LogStage::UpstreamRequest,
                    LogComponent::Relay,
                    "long_running_done",
                    "长任务完成",
                    channel_id = channel.id,
                    operation = %operation,
                    polls = poll
                );
                return Ok(outcome);
            }
            tokio::time::sleep(self.settings.interval).await;
        }

        Err(UpstreamError::upstream(
            504,
            format!("任务 {operation} 在 {} 次查询后仍未完成", self.settings.max_polls),
            "job_timeout",
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChannelBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountdownJob {
        remaining: AtomicU32,
        polls: AtomicU32,
    }

    impl CountdownJob {
        fn new(pending_polls: u32) -> Self {
            Self {
                remaining: AtomicU32::new(pending_polls),
                polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LongRunningJob for CountdownJob {
        async fn submit(
            &self,
            _channel: &Channel,
            _model: &str,
            _request: &RelayRequest,
        ) -> Result<String, UpstreamError> {
            Ok("operations/42".into())
        }

        async fn poll(&self, _channel: &Channel, operation: &str) -> Result<JobStatus, UpstreamError> {
            assert_eq!(operation, "operations/42");
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return Ok(JobStatus::Done(DispatchOutcome {
                    text: "video".into(),
                    ..DispatchOutcome::default()
                }));
            }
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            Ok(JobStatus::Pending)
        }
    }

    fn settings(max_polls: u32) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            max_polls,
        }
    }

    #[tokio::test]
    async fn test_polls_until_done() {
        let dispatcher = LongRunningDispatcher::new(CountdownJob::new(2), settings(5));
        let channel = ChannelBuilder::new(1).build();
        let request = RelayRequest::new("req", "default", "veo");

        let outcome = dispatcher.dispatch(&channel, "veo", &request).await.unwrap();
        assert_eq!(outcome.text, "video");
        assert_eq!(dispatcher.job.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_limit_is_gateway_timeout() {
        let dispatcher = LongRunningDispatcher::new(CountdownJob::new(10), settings(3));
        let channel = ChannelBuilder::new(1).build();
        let request = RelayRequest::new("req", "default", "veo");

        let failure = dispatcher.dispatch(&channel, "veo", &request).await.unwrap_err();
        assert_eq!(failure.error.status_code, 504);
        assert!(!failure.committed);
        assert_eq!(dispatcher.job.polls.load(Ordering::SeqCst), 3);
    }
}
