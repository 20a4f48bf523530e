//! # 渠道持久化访问
//!
//! 核心逻辑只依赖 `ChannelStore` / `GroupStore` 两个特质，
//! `DatabaseStore` 是基于 Sea-ORM 的默认实现

use async_trait::async_trait;
use chrono::Utc;
use entity::{channels, user_groups};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use super::types::{Channel, ChannelStatus};
use crate::auth::UserGroup;
use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 渠道数据源
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// 读取全部启用状态的渠道，按 id 升序
    async fn fetch_enabled_channels(&self) -> Result<Vec<Channel>>;

    /// 按 id 读取单个渠道（任意状态）
    async fn get_channel_by_id(&self, channel_id: i32) -> Result<Option<Channel>>;

    /// 更新渠道状态，返回是否有记录被修改
    async fn update_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<bool>;
}

/// 分组倍率数据源
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// 读取全部启用的分组
    async fn fetch_groups(&self) -> Result<Vec<UserGroup>>;
}

/// 基于数据库的存储实现
#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseStore {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChannelStore for DatabaseStore {
    async fn fetch_enabled_channels(&self) -> Result<Vec<Channel>> {
        let rows = channels::Entity::find()
            .filter(channels::Column::Status.eq(channels::STATUS_ENABLED))
            .order_by_asc(channels::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| ProxyError::database_with_source("查询启用渠道失败", e))?;

        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "fetch_enabled_channels",
            "加载启用渠道",
            count = rows.len()
        );

        Ok(rows.into_iter().map(Channel::from).collect())
    }

    async fn get_channel_by_id(&self, channel_id: i32) -> Result<Option<Channel>> {
        let row = channels::Entity::find_by_id(channel_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| {
                ProxyError::database_with_source(format!("查询渠道 {channel_id} 失败"), e)
            })?;
        Ok(row.map(Channel::from))
    }

    async fn update_channel_status(&self, channel_id: i32, status: ChannelStatus) -> Result<bool> {
        let Some(row) = channels::Entity::find_by_id(channel_id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(false);
        };

        let mut active: channels::ActiveModel = row.into();
        active.status = Set(status.as_i32());
        active.updated_at = Set(Utc::now().naive_utc());
        active.update(self.db.as_ref()).await.map_err(|e| {
            ProxyError::database_with_source(format!("更新渠道 {channel_id} 状态失败"), e)
        })?;

        linfo!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "update_channel_status",
            "渠道状态已更新",
            channel_id = channel_id,
            status = %status
        );
        Ok(true)
    }
}

#[async_trait]
impl GroupStore for DatabaseStore {
    async fn fetch_groups(&self) -> Result<Vec<UserGroup>> {
        let rows = user_groups::Entity::find()
            .filter(user_groups::Column::Enabled.eq(true))
            .all(self.db.as_ref())
            .await
            .map_err(|e| ProxyError::database_with_source("查询用户分组失败", e))?;

        Ok(rows.into_iter().map(UserGroup::from).collect())
    }
}
