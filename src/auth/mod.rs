//! # 分组授权模块
//!
//! 只负责"调用方属于分组 G，请求使用分组 T"的授权判定与倍率查询，
//! 用户、令牌与会话管理不在此处

pub mod group;

pub use group::{GroupGrant, GroupRatioRegistry, UserGroup};
