//! # 额度与用量协作方
//!
//! 每次尝试前预扣额度，成功后按实际用量结算，失败时退回预扣。
//! 具体计费实现由外部提供，这里只定义契约与默认实现。

mod tokens;

use async_trait::async_trait;

use crate::error::Result;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::relay::{RelayRequest, Usage};

pub use tokens::{EstimatingTokenCounter, TokenCounter};

/// 一次预扣的凭据
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaReservation {
    pub request_id: String,
    pub group: String,
    /// 分组计费倍率
    pub ratio: f64,
    /// 计费使用的模型名
    pub model: String,
    pub prompt_tokens: u32,
    /// 预扣的额度
    pub reserved: i64,
}

/// 额度服务
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// 按提示词 token 预扣额度，失败时请求直接终止
    async fn reserve(
        &self,
        request: &RelayRequest,
        model: &str,
        prompt_tokens: u32,
    ) -> Result<QuotaReservation>;

    /// 按实际用量结算
    async fn settle(&self, reservation: &QuotaReservation, usage: &Usage, is_stream: bool) -> Result<()>;

    /// 退回预扣
    async fn reverse(&self, reservation: &QuotaReservation) -> Result<()>;
}

/// 不限额度的默认实现，只记录用量
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaService for UnlimitedQuota {
    async fn reserve(
        &self,
        request: &RelayRequest,
        model: &str,
        prompt_tokens: u32,
    ) -> Result<QuotaReservation> {
        Ok(QuotaReservation {
            request_id: request.request_id.clone(),
            group: request.group.clone(),
            ratio: request.group_ratio,
            model: model.to_string(),
            prompt_tokens,
            reserved: 0,
        })
    }

    async fn settle(&self, reservation: &QuotaReservation, usage: &Usage, is_stream: bool) -> Result<()> {
        ldebug!(
            reservation.request_id,
            LogStage::Response,
            LogComponent::Quota,
            "settle",
            "用量结算",
            model = %reservation.model,
            group = %reservation.group,
            ratio = reservation.ratio,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            is_stream = is_stream
        );
        Ok(())
    }

    async fn reverse(&self, reservation: &QuotaReservation) -> Result<()> {
        ldebug!(
            reservation.request_id,
            LogStage::Response,
            LogComponent::Quota,
            "reverse",
            "退回预扣额度",
            reserved = reservation.reserved
        );
        Ok(())
    }
}
