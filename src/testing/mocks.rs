//! # 测试 Mock 对象
//!
//! 提供存储、通知、分发与额度协作方的 Mock 与内存实现

use async_trait::async_trait;
use mockall::mock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::auth::UserGroup;
use crate::channel::{Channel, ChannelStatus, ChannelStore, GroupStore};
use crate::error::{ProxyError, Result};
use crate::notify::Notifier;
use crate::provider::ChannelDispatcher;
use crate::quota::{QuotaReservation, QuotaService, UnlimitedQuota};
use crate::relay::{DispatchFailure, DispatchOutcome, RelayRequest, UpstreamError, Usage};

mock! {
    pub ChannelStore {}

    #[async_trait]
    impl ChannelStore for ChannelStore {
        async fn fetch_enabled_channels(&self) -> Result<Vec<Channel>>;
        async fn get_channel_by_id(&self, channel_id: i32) -> Result<Option<Channel>>;
        async fn update_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<bool>;
    }
}

mock! {
    pub GroupStore {}

    #[async_trait]
    impl GroupStore for GroupStore {
        async fn fetch_groups(&self) -> Result<Vec<UserGroup>>;
    }
}

/// 内存渠道存储，可注入读写延迟
#[derive(Debug, Default)]
pub struct InMemoryChannelStore {
    channels: Mutex<BTreeMap<i32, Channel>>,
    status_updates: Mutex<HashMap<i32, usize>>,
    latency: Mutex<Duration>,
    fail_fetch: AtomicBool,
}

impl InMemoryChannelStore {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: Mutex::new(channels.into_iter().map(|c| (c.id, c)).collect()),
            ..Self::default()
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// 让后续 `fetch_enabled_channels` 返回数据库错误
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// 新增或替换渠道
    pub fn upsert(&self, channel: Channel) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.id, channel);
    }

    pub fn status_of(&self, channel_id: i32) -> Option<ChannelStatus> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .map(|c| c.status)
    }

    /// 某渠道被更新状态的次数
    pub fn status_updates(&self, channel_id: i32) -> usize {
        self.status_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .copied()
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn fetch_enabled_channels(&self) -> Result<Vec<Channel>> {
        self.simulate_latency().await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ProxyError::database("connection refused"));
        }
        Ok(self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.status == ChannelStatus::Enabled)
            .cloned()
            .collect())
    }

    async fn get_channel_by_id(&self, channel_id: i32) -> Result<Option<Channel>> {
        self.simulate_latency().await;
        Ok(self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .cloned())
    }

    async fn update_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<bool> {
        self.simulate_latency().await;
        let updated = match self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&channel_id)
        {
            Some(channel) => {
                channel.status = status;
                true
            }
            None => false,
        };
        if updated {
            *self
                .status_updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(channel_id)
                .or_default() += 1;
        }
        Ok(updated)
    }
}

/// 记录已发送通知的通知器
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// 按渠道脚本化响应的分发器
///
/// 每个渠道的响应按队列依次返回，队列耗尽后返回默认成功结果
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<i32, VecDeque<std::result::Result<DispatchOutcome, DispatchFailure>>>>,
    calls: Mutex<Vec<(i32, String)>>,
    latency: Mutex<Duration>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为渠道追加一个失败响应
    pub fn fail(self, channel_id: i32, error: UpstreamError) -> Self {
        self.push(channel_id, Err(DispatchFailure::from(error)));
        self
    }

    /// 为渠道追加一个已向客户端写出数据后的失败
    pub fn fail_committed(self, channel_id: i32, error: UpstreamError) -> Self {
        self.push(
            channel_id,
            Err(DispatchFailure {
                error,
                committed: true,
            }),
        );
        self
    }

    /// 为渠道追加一个成功响应
    pub fn succeed(self, channel_id: i32, outcome: DispatchOutcome) -> Self {
        self.push(channel_id, Ok(outcome));
        self
    }

    /// 让渠道始终失败
    pub fn always_fail(self, channel_id: i32, error: &UpstreamError, times: usize) -> Self {
        for _ in 0..times {
            self.push(channel_id, Err(DispatchFailure::from(error.clone())));
        }
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    fn push(&self, channel_id: i32, response: std::result::Result<DispatchOutcome, DispatchFailure>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id)
            .or_default()
            .push_back(response);
    }

    /// 按顺序被调用的渠道 id
    pub fn called_channels(&self) -> Vec<i32> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// 分发时使用的模型名
    pub fn called_models(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, model)| model.clone())
            .collect()
    }
}

#[async_trait]
impl ChannelDispatcher for ScriptedDispatcher {
    async fn dispatch(
        &self,
        channel: &Channel,
        model: &str,
        _request: &RelayRequest,
    ) -> std::result::Result<DispatchOutcome, DispatchFailure> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel.id, model.to_string()));

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&channel.id)
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| {
            Ok(DispatchOutcome {
                usage: Some(Usage::new(10, 5)),
                text: format!("reply from {}", channel.id),
                ..DispatchOutcome::default()
            })
        })
    }
}

/// 记录预扣、结算与退回次数的额度服务
#[derive(Debug, Default)]
pub struct RecordingQuota {
    reject: AtomicBool,
    reserves: AtomicUsize,
    settles: AtomicUsize,
    reverses: AtomicUsize,
    settled_usage: Mutex<Vec<Usage>>,
    reservations: Mutex<Vec<QuotaReservation>>,
}

impl RecordingQuota {
    /// 预扣始终失败
    pub fn rejecting() -> Self {
        let quota = Self::default();
        quota.reject.store(true, Ordering::SeqCst);
        quota
    }

    pub fn reserves(&self) -> usize {
        self.reserves.load(Ordering::SeqCst)
    }

    pub fn settles(&self) -> usize {
        self.settles.load(Ordering::SeqCst)
    }

    pub fn reverses(&self) -> usize {
        self.reverses.load(Ordering::SeqCst)
    }

    /// 记录到的预扣凭据
    pub fn reservations(&self) -> Vec<QuotaReservation> {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settled_usage(&self) -> Vec<Usage> {
        self.settled_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QuotaService for RecordingQuota {
    async fn reserve(
        &self,
        request: &RelayRequest,
        model: &str,
        prompt_tokens: u32,
    ) -> Result<QuotaReservation> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ProxyError::business("用户额度不足"));
        }
        self.reserves.fetch_add(1, Ordering::SeqCst);
        let reservation = UnlimitedQuota.reserve(request, model, prompt_tokens).await?;
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reservation.clone());
        Ok(reservation)
    }

    async fn settle(&self, _reservation: &QuotaReservation, usage: &Usage, _is_stream: bool) -> Result<()> {
        self.settles.fetch_add(1, Ordering::SeqCst);
        self.settled_usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*usage);
        Ok(())
    }

    async fn reverse(&self, _reservation: &QuotaReservation) -> Result<()> {
        self.reverses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
