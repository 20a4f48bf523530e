//! # 渠道注册表与路由表
//!
//! 从存储批量加载启用的渠道，构建 `分组 -> 模型 -> 优先级层` 路由表。
//! 重新加载时离锁构建新快照，再在写锁下整体替换，读方只会看到完整的旧表或新表。

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use super::matcher::{is_wildcard, resolve_model};
use super::store::ChannelStore;
use super::types::{Channel, ChannelChoice, ChannelStatus};
use crate::error::{Result, RoutingError, RoutingResult};
use crate::logging::{LogComponent, LogStage};
use crate::scheduler::{CooldownTracker, FilterChain, WeightedBalancer};
use crate::{ldebug, lerror, linfo};

/// `分组 -> 模型 -> 优先级层（高到低）`
pub type RoutingRule = HashMap<String, HashMap<String, Vec<Vec<i32>>>>;

/// 注册表选项
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// 权重为 0 的渠道使用的默认权重
    pub default_weight: u32,
    /// 模型名大小写不敏感匹配
    pub case_insensitive: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            default_weight: 1,
            case_insensitive: false,
        }
    }
}

/// 一次加载得到的不可变路由快照
#[derive(Debug, Default)]
pub struct RoutingSnapshot {
    channels: HashMap<i32, Arc<ChannelChoice>>,
    rule: RoutingRule,
    wildcard_models: Vec<String>,
    model_groups: HashMap<String, HashSet<String>>,
}

impl RoutingSnapshot {
    /// 由渠道列表构建快照，非启用状态的渠道被忽略
    #[must_use]
    pub fn build(channels: Vec<Channel>, default_weight: u32) -> Self {
        let mut choices = HashMap::with_capacity(channels.len());
        let mut buckets: HashMap<(String, String), BTreeMap<i64, Vec<i32>>> = HashMap::new();
        let mut wildcards: BTreeSet<String> = BTreeSet::new();
        let mut model_groups: HashMap<String, HashSet<String>> = HashMap::new();

        for mut channel in channels {
            if channel.status != ChannelStatus::Enabled {
                continue;
            }
            if channel.weight == 0 {
                channel.weight = default_weight;
            }

            for group in channel.groups.iter().map(|g| g.trim()).filter(|g| !g.is_empty()) {
                for model in channel.models.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
                    let tier = buckets
                        .entry((group.to_string(), model.to_string()))
                        .or_default()
                        .entry(channel.priority)
                        .or_default();
                    if !tier.contains(&channel.id) {
                        tier.push(channel.id);
                    }

                    if is_wildcard(model) {
                        wildcards.insert(model.to_string());
                    }
                    model_groups
                        .entry(model.to_string())
                        .or_default()
                        .insert(group.to_string());
                }
            }

            choices.insert(channel.id, Arc::new(ChannelChoice::new(channel)));
        }

        let mut rule: RoutingRule = HashMap::new();
        for ((group, model), priorities) in buckets {
            let tiers: Vec<Vec<i32>> = priorities.into_values().rev().collect();
            rule.entry(group).or_default().insert(model, tiers);
        }

        Self {
            channels: choices,
            rule,
            wildcard_models: wildcards.into_iter().collect(),
            model_groups,
        }
    }

    /// 路由表
    #[must_use]
    pub const fn rule(&self) -> &RoutingRule {
        &self.rule
    }

    /// 渠道表
    #[must_use]
    pub const fn channels(&self) -> &HashMap<i32, Arc<ChannelChoice>> {
        &self.channels
    }

    /// 出现过的通配模型
    #[must_use]
    pub fn wildcard_models(&self) -> &[String] {
        &self.wildcard_models
    }

    /// 某分组某模型的优先级层
    #[must_use]
    pub fn tiers(&self, group: &str, model: &str) -> Option<&[Vec<i32>]> {
        self.rule
            .get(group)
            .and_then(|models| models.get(model))
            .map(Vec::as_slice)
    }
}

/// 一次加载的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub channels: usize,
    pub groups: usize,
    pub wildcard_models: usize,
}

/// 渠道注册表
pub struct ChannelRegistry {
    store: Arc<dyn ChannelStore>,
    snapshot: RwLock<Arc<RoutingSnapshot>>,
    balancer: WeightedBalancer,
    options: RegistryOptions,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("options", &self.options)
            .field("channels", &self.channel_count())
            .finish_non_exhaustive()
    }
}

impl ChannelRegistry {
    /// 创建空注册表，需调用 [`Self::load`] 填充
    #[must_use]
    pub fn new(
        store: Arc<dyn ChannelStore>,
        cooldowns: Arc<CooldownTracker>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(RoutingSnapshot::default())),
            balancer: WeightedBalancer::new(cooldowns),
            options,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &RegistryOptions {
        &self.options
    }

    #[must_use]
    pub const fn cooldowns(&self) -> &Arc<CooldownTracker> {
        self.balancer.cooldowns()
    }

    /// 当前快照
    #[must_use]
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: RoutingSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(next);
    }

    /// 从存储重新加载全部启用渠道
    ///
    /// 读取失败时保留旧快照并返回错误
    pub async fn load(&self) -> Result<LoadSummary> {
        let channels = match self.store.fetch_enabled_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Registry,
                    "load_channels_failed",
                    "加载渠道失败，继续使用旧路由表",
                    error = %e
                );
                return Err(e);
            }
        };

        let next = RoutingSnapshot::build(channels, self.options.default_weight);
        let summary = LoadSummary {
            channels: next.channels.len(),
            groups: next.rule.len(),
            wildcard_models: next.wildcard_models.len(),
        };
        self.swap(next);

        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::Registry,
            "load_channels",
            "渠道加载完成",
            channels = summary.channels,
            groups = summary.groups,
            wildcard_models = summary.wildcard_models
        );
        Ok(summary)
    }

    /// 将请求的模型名解析为分组内路由使用的模型键
    pub fn get_matched_model_name(&self, group: &str, model: &str) -> RoutingResult<String> {
        let snapshot = self.snapshot();
        let models = snapshot
            .rule
            .get(group)
            .ok_or_else(|| RoutingError::GroupNotFound {
                group: group.to_string(),
            })?;

        resolve_model(
            models,
            &snapshot.wildcard_models,
            model,
            self.options.case_insensitive,
        )
        .map(str::to_string)
        .ok_or_else(|| RoutingError::ModelNotFoundInGroup {
            group: group.to_string(),
            model: model.to_string(),
        })
    }

    /// 解析模型名后逐层选择渠道
    pub fn next(&self, group: &str, model: &str, filters: &FilterChain) -> RoutingResult<Arc<Channel>> {
        let snapshot = self.snapshot();
        let models = snapshot
            .rule
            .get(group)
            .ok_or_else(|| RoutingError::GroupNotFound {
                group: group.to_string(),
            })?;

        let resolved = resolve_model(
            models,
            &snapshot.wildcard_models,
            model,
            self.options.case_insensitive,
        )
        .ok_or_else(|| RoutingError::ModelNotFound {
            model: model.to_string(),
        })?;

        let tiers = models.get(resolved).map(Vec::as_slice).unwrap_or_default();
        if tiers.is_empty() {
            return Err(RoutingError::ChannelNotFound);
        }

        self.pick_from_tiers(&snapshot, tiers, resolved, filters)
            .ok_or(RoutingError::ChannelNotFound)
    }

    /// 使用已解析的模型名逐层选择渠道
    ///
    /// 选择失败且路由表引用了不存在的渠道时返回 `DatabaseConsistencyBroken`
    pub fn next_by_validated_model(
        &self,
        group: &str,
        model: &str,
        filters: &FilterChain,
    ) -> RoutingResult<Arc<Channel>> {
        let snapshot = self.snapshot();
        let models = snapshot
            .rule
            .get(group)
            .ok_or_else(|| RoutingError::GroupNotFound {
                group: group.to_string(),
            })?;

        let tiers = models
            .get(model)
            .ok_or_else(|| RoutingError::ModelNotFoundInGroup {
                group: group.to_string(),
                model: model.to_string(),
            })?;
        if tiers.is_empty() {
            return Err(RoutingError::NoChannelsAvailable {
                group: group.to_string(),
                model: model.to_string(),
            });
        }

        if let Some(channel) = self.pick_from_tiers(&snapshot, tiers, model, filters) {
            return Ok(channel);
        }

        if let Some(&missing) = tiers
            .iter()
            .flatten()
            .find(|id| !snapshot.channels.contains_key(id))
        {
            lerror!(
                "system",
                LogStage::Scheduling,
                LogComponent::Registry,
                "database_consistency_broken",
                "路由表引用了不存在的渠道",
                channel_id = missing,
                group = group,
                model = model
            );
            return Err(RoutingError::DatabaseConsistencyBroken {
                channel_id: missing,
            });
        }

        Err(RoutingError::NoAvailableChannelsAfterFiltering {
            group: group.to_string(),
            model: model.to_string(),
        })
    }

    fn pick_from_tiers(
        &self,
        snapshot: &RoutingSnapshot,
        tiers: &[Vec<i32>],
        model: &str,
        filters: &FilterChain,
    ) -> Option<Arc<Channel>> {
        tiers.iter().enumerate().find_map(|(index, tier)| {
            let picked = self.balancer.pick(tier, &snapshot.channels, model, filters);
            if let Some(channel) = &picked {
                ldebug!(
                    "system",
                    LogStage::Scheduling,
                    LogComponent::Balancer,
                    "channel_selected",
                    "选中渠道",
                    channel_id = channel.id,
                    tier = index,
                    model = model
                );
            }
            picked
        })
    }

    /// 统计当前可用（存在、未禁用、未冷却、通过过滤）的渠道数，跨层去重
    #[must_use]
    pub fn count_available_channels(&self, group: &str, model: &str, filters: &FilterChain) -> usize {
        let snapshot = self.snapshot();
        let Some(tiers) = snapshot.tiers(group, model) else {
            return 0;
        };

        tiers
            .iter()
            .flatten()
            .copied()
            .collect::<HashSet<i32>>()
            .into_iter()
            .filter(|id| {
                snapshot
                    .channels
                    .get(id)
                    .is_some_and(|choice| self.balancer.is_eligible(choice, model, filters))
            })
            .count()
    }

    /// 运行时启用渠道，返回渠道是否在快照中
    pub fn enable(&self, channel_id: i32) -> bool {
        self.change_status(channel_id, true)
    }

    /// 运行时禁用渠道，返回渠道是否在快照中
    pub fn disable(&self, channel_id: i32) -> bool {
        self.change_status(channel_id, false)
    }

    pub fn change_status(&self, channel_id: i32, enabled: bool) -> bool {
        let snapshot = self.snapshot();
        let Some(choice) = snapshot.channels.get(&channel_id) else {
            return false;
        };
        choice.set_disabled(!enabled);

        ldebug!(
            "system",
            LogStage::HealthCheck,
            LogComponent::Registry,
            "change_status",
            "渠道运行时状态变更",
            channel_id = channel_id,
            enabled = enabled
        );
        true
    }

    /// 渠道在当前快照中且未被运行时禁用
    #[must_use]
    pub fn is_channel_enabled(&self, channel_id: i32) -> bool {
        self.snapshot()
            .channels
            .get(&channel_id)
            .is_some_and(|choice| !choice.is_disabled())
    }

    /// 分组下的全部模型键，按名称排序
    pub fn get_group_models(&self, group: &str) -> RoutingResult<Vec<String>> {
        let snapshot = self.snapshot();
        let models = snapshot
            .rule
            .get(group)
            .ok_or_else(|| RoutingError::GroupNotFound {
                group: group.to_string(),
            })?;

        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// 模型到提供该模型的分组集合
    #[must_use]
    pub fn get_models_groups(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.snapshot()
            .model_groups
            .iter()
            .map(|(model, groups)| (model.clone(), groups.iter().cloned().collect()))
            .collect()
    }

    #[must_use]
    pub fn get_channel(&self, channel_id: i32) -> Option<Arc<Channel>> {
        self.snapshot()
            .channels
            .get(&channel_id)
            .map(|choice| Arc::clone(&choice.channel))
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.snapshot().channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::scheduler::FilterOptions;
    use crate::testing::{ChannelBuilder, MockChannelStore};
    use pretty_assertions::assert_eq;

    fn registry_with(channels: Vec<Channel>, options: RegistryOptions) -> ChannelRegistry {
        let registry = ChannelRegistry::new(
            Arc::new(MockChannelStore::new()),
            Arc::new(CooldownTracker::new(60)),
            options,
        );
        registry.swap(RoutingSnapshot::build(channels, registry.options.default_weight));
        registry
    }

    fn registry(channels: Vec<Channel>) -> ChannelRegistry {
        registry_with(channels, RegistryOptions::default())
    }

    #[test]
    fn test_build_orders_tiers_descending() {
        let snapshot = RoutingSnapshot::build(
            vec![
                ChannelBuilder::new(1).priority(10).models(&["m"]).build(),
                ChannelBuilder::new(2).priority(5).models(&["m"]).build(),
                ChannelBuilder::new(3).priority(10).models(&["m"]).build(),
                ChannelBuilder::new(4).priority(1).models(&["m"]).build(),
            ],
            1,
        );

        assert_eq!(
            snapshot.tiers("default", "m").unwrap(),
            &[vec![1, 3], vec![2], vec![4]]
        );
    }

    #[test]
    fn test_build_normalizes_and_skips_disabled() {
        let snapshot = RoutingSnapshot::build(
            vec![
                ChannelBuilder::new(1)
                    .groups(&["default", " vip "])
                    .models(&["gpt-4o", "gpt-4*"])
                    .weight(0)
                    .build(),
                ChannelBuilder::new(2)
                    .status(ChannelStatus::AutoDisabled)
                    .build(),
            ],
            7,
        );

        assert_eq!(snapshot.channels().len(), 1);
        assert_eq!(snapshot.channels()[&1].weight(), 7);
        assert!(snapshot.tiers("vip", "gpt-4o").is_some());
        assert_eq!(snapshot.wildcard_models(), &["gpt-4*".to_string()]);
        assert_eq!(snapshot.model_groups["gpt-4o"].len(), 2);
    }

    #[test]
    fn test_tier_priority_ordering() {
        let registry = registry(vec![
            ChannelBuilder::new(1).priority(10).models(&["m"]).build(),
            ChannelBuilder::new(2).priority(5).models(&["m"]).build(),
            ChannelBuilder::new(3).priority(10).models(&["m"]).build(),
            ChannelBuilder::new(4).priority(1).models(&["m"]).build(),
        ]);

        for _ in 0..200 {
            let id = registry.next("default", "m", &[]).unwrap().id;
            assert!(id == 1 || id == 3, "selected {id} from a lower tier");
        }

        registry.cooldowns().set_cooldown(1, "m");
        registry.disable(3);
        for _ in 0..50 {
            assert_eq!(registry.next("default", "m", &[]).unwrap().id, 2);
        }

        let excluded = FilterOptions::default().build(&HashSet::from([2]));
        assert_eq!(registry.next("default", "m", &excluded).unwrap().id, 4);
    }

    #[test]
    fn test_case_insensitive_resolution() {
        let channels = vec![ChannelBuilder::new(1).models(&["gpt-4o"]).build()];

        let insensitive = registry_with(
            channels.clone(),
            RegistryOptions {
                case_insensitive: true,
                ..RegistryOptions::default()
            },
        );
        assert_eq!(
            insensitive.get_matched_model_name("default", "GPT-4O").unwrap(),
            "gpt-4o"
        );
        assert_eq!(insensitive.next("default", "GPT-4O", &[]).unwrap().id, 1);

        let sensitive = registry(channels);
        assert_eq!(
            sensitive.next("default", "GPT-4O", &[]).unwrap_err(),
            RoutingError::ModelNotFound {
                model: "GPT-4O".into()
            }
        );
        assert!(matches!(
            sensitive.get_matched_model_name("default", "GPT-4O"),
            Err(RoutingError::ModelNotFoundInGroup { .. })
        ));
    }

    #[test]
    fn test_wildcard_resolves_to_pattern() {
        let registry = registry(vec![ChannelBuilder::new(1).models(&["claude-3*"]).build()]);
        assert_eq!(
            registry
                .get_matched_model_name("default", "claude-3-5-sonnet")
                .unwrap(),
            "claude-3*"
        );
        assert_eq!(
            registry.next("default", "claude-3-opus", &[]).unwrap().id,
            1
        );
    }

    #[test]
    fn test_error_variants() {
        let registry = registry(vec![ChannelBuilder::new(1).models(&["m"]).build()]);

        assert_eq!(
            registry.next("vip", "m", &[]).unwrap_err(),
            RoutingError::GroupNotFound { group: "vip".into() }
        );
        assert!(matches!(
            registry.next_by_validated_model("default", "x", &[]),
            Err(RoutingError::ModelNotFoundInGroup { .. })
        ));

        registry.disable(1);
        assert_eq!(
            registry.next("default", "m", &[]).unwrap_err(),
            RoutingError::ChannelNotFound
        );
        assert!(matches!(
            registry.next_by_validated_model("default", "m", &[]),
            Err(RoutingError::NoAvailableChannelsAfterFiltering { .. })
        ));
    }

    #[test]
    fn test_database_consistency_broken() {
        let registry = registry(vec![]);
        let mut snapshot = RoutingSnapshot::default();
        snapshot
            .rule
            .entry("default".into())
            .or_default()
            .insert("m".into(), vec![vec![42]]);
        registry.swap(snapshot);

        assert_eq!(
            registry.next_by_validated_model("default", "m", &[]).unwrap_err(),
            RoutingError::DatabaseConsistencyBroken { channel_id: 42 }
        );
    }

    #[test]
    fn test_count_available_channels() {
        let registry = registry(vec![
            ChannelBuilder::new(1).priority(10).models(&["m"]).build(),
            ChannelBuilder::new(2).priority(5).models(&["m"]).build(),
            ChannelBuilder::new(3).priority(5).models(&["m"]).only_chat(true).build(),
        ]);

        assert_eq!(registry.count_available_channels("default", "m", &[]), 3);
        assert_eq!(registry.count_available_channels("default", "x", &[]), 0);

        registry.cooldowns().set_cooldown(1, "m");
        let filters = FilterOptions {
            skip_only_chat: true,
            ..FilterOptions::default()
        }
        .build(&HashSet::new());
        assert_eq!(registry.count_available_channels("default", "m", &filters), 1);
    }

    #[test]
    fn test_group_and_model_listings() {
        let registry = registry(vec![
            ChannelBuilder::new(1).groups(&["default", "vip"]).models(&["b", "a"]).build(),
            ChannelBuilder::new(2).groups(&["vip"]).models(&["c"]).build(),
        ]);

        assert_eq!(registry.get_group_models("vip").unwrap(), vec!["a", "b", "c"]);
        assert!(registry.get_group_models("nope").is_err());

        let models_groups = registry.get_models_groups();
        assert_eq!(
            models_groups["a"].iter().collect::<Vec<_>>(),
            vec!["default", "vip"]
        );
        assert_eq!(registry.get_channel(2).unwrap().id, 2);
        assert!(registry.get_channel(9).is_none());
    }

    #[tokio::test]
    async fn test_load_failure_keeps_previous_snapshot() {
        let mut store = MockChannelStore::new();
        let mut calls = 0;
        store.expect_fetch_enabled_channels().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![ChannelBuilder::new(1).models(&["m"]).build()])
            } else {
                Err(ProxyError::database("connection reset"))
            }
        });

        let registry = ChannelRegistry::new(
            Arc::new(store),
            Arc::new(CooldownTracker::new(5)),
            RegistryOptions::default(),
        );

        let summary = registry.load().await.unwrap();
        assert_eq!(summary.channels, 1);
        assert!(registry.load().await.is_err());
        assert_eq!(registry.next("default", "m", &[]).unwrap().id, 1);
    }
}
