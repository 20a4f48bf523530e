//! # 上游渠道实体定义
//!
//! 渠道（channel）是某个上游供应商的一组凭证与入口地址

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 渠道状态：启用
pub const STATUS_ENABLED: i32 = 1;
/// 渠道状态：手动禁用
pub const STATUS_MANUALLY_DISABLED: i32 = 2;
/// 渠道状态：自动禁用
pub const STATUS_AUTO_DISABLED: i32 = 3;

/// 上游渠道实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub channel_type: i32,
    pub name: String,
    pub key: String,
    pub base_url: Option<String>,
    /// 逗号分隔的分组列表
    pub groups: String,
    /// 逗号分隔的模型列表，允许 `*` 结尾的通配模式
    pub models: String,
    pub weight: Option<i32>,
    pub priority: Option<i64>,
    pub status: i32,
    pub only_chat: bool,
    /// 逗号分隔的禁止流式输出的模型列表
    pub disabled_stream: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
