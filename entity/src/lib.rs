//! # Entity 模块
//!
//! 包含所有 Sea-ORM 实体定义

pub mod channels;
pub mod user_groups;

pub use channels::Entity as Channels;
pub use user_groups::Entity as UserGroups;
