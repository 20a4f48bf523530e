use thiserror::Error;

/// 渠道路由与选择失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("分组 {group} 不存在")]
    GroupNotFound { group: String },

    #[error("模型 {model} 不存在")]
    ModelNotFound { model: String },

    #[error("当前分组 {group} 下对于模型 {model} 无可用渠道")]
    ModelNotFoundInGroup { group: String, model: String },

    #[error("渠道不存在")]
    ChannelNotFound,

    #[error("分组 {group} 下模型 {model} 没有配置渠道")]
    NoChannelsAvailable { group: String, model: String },

    #[error("分组 {group} 下模型 {model} 的渠道均已被过滤")]
    NoAvailableChannelsAfterFiltering { group: String, model: String },

    #[error("路由表引用了不存在的渠道 {channel_id}")]
    DatabaseConsistencyBroken { channel_id: i32 },

    #[error("无效的渠道 ID: {channel_id}")]
    InvalidChannelId { channel_id: i32 },

    #[error("渠道 {channel_id} 已被禁用")]
    ChannelDisabled { channel_id: i32 },
}

impl RoutingError {
    /// 是否属于"无可用渠道"类错误，用户侧统一表现为上游饱和
    #[must_use]
    pub const fn is_capacity_exhausted(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound
                | Self::NoChannelsAvailable { .. }
                | Self::NoAvailableChannelsAfterFiltering { .. }
        )
    }
}
