//! # 分组倍率与授权
//!
//! 分组（group）决定请求可使用的渠道集合与计费倍率。
//! 令牌可以指定一个不同于用户默认分组的分组，但该分组必须是公开的。

use entity::user_groups;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::channel::GroupStore;
use crate::error::Result;
use crate::{lerror, linfo};
use crate::logging::{LogComponent, LogStage};

/// 分组倍率规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGroup {
    pub symbol: String,
    pub name: String,
    pub ratio: f64,
    pub public: bool,
    pub enabled: bool,
}

impl From<user_groups::Model> for UserGroup {
    fn from(model: user_groups::Model) -> Self {
        Self {
            symbol: model.symbol,
            name: model.name,
            ratio: model.ratio,
            public: model.public,
            enabled: model.enabled,
        }
    }
}

/// 授权通过后的请求分组
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGrant {
    /// 用户自身分组
    pub user_group: String,
    /// 实际用于路由与计费的分组
    pub token_group: String,
    pub ratio: f64,
}

/// 分组倍率注册表
pub struct GroupRatioRegistry {
    store: Arc<dyn GroupStore>,
    groups: RwLock<Arc<HashMap<String, UserGroup>>>,
}

impl GroupRatioRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn GroupStore>) -> Self {
        Self {
            store,
            groups: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// 从存储重新加载分组，失败时保留旧数据
    pub async fn load(&self) -> Result<usize> {
        let fetched = match self.store.fetch_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Auth,
                    "load_groups_failed",
                    "加载用户分组失败，继续使用旧数据",
                    error = %e
                );
                return Err(e);
            }
        };
        let groups: HashMap<String, UserGroup> = fetched
            .into_iter()
            .filter(|group| group.enabled)
            .map(|group| (group.symbol.clone(), group))
            .collect();
        let count = groups.len();

        *self.groups.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(groups);

        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::Auth,
            "load_groups",
            "用户分组加载完成",
            count = count
        );
        Ok(count)
    }

    fn current(&self) -> Arc<HashMap<String, UserGroup>> {
        Arc::clone(&self.groups.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn get_by_symbol(&self, symbol: &str) -> Option<UserGroup> {
        self.current().get(symbol).cloned()
    }

    /// 校验请求能否使用令牌指定的分组，未指定时使用用户分组
    pub fn authorize(&self, user_group: &str, token_group: Option<&str>) -> Result<GroupGrant> {
        let token_group = token_group
            .filter(|group| !group.is_empty())
            .unwrap_or(user_group);

        let groups = self.current();
        let rule = groups
            .get(token_group)
            .ok_or_else(|| crate::permission_error!("分组 {} 不存在", token_group))?;

        if token_group != user_group && !rule.public {
            return Err(crate::permission_error!("无权使用分组 {}", token_group));
        }

        Ok(GroupGrant {
            user_group: user_group.to_string(),
            token_group: token_group.to_string(),
            ratio: rule.ratio,
        })
    }
}
