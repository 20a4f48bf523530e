//! # 负载均衡性能基准测试

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use llm_gateway::channel::{
    Channel, ChannelChoice, ChannelRegistry, ChannelStore, RegistryOptions,
};
use llm_gateway::scheduler::{ChannelFilter, ExcludeChannelIds, WeightedBalancer};
use llm_gateway::{ChannelStatus, ChannelType, CooldownTracker, Result};
use std::collections::{HashMap, HashSet};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn channel(id: i32, priority: i64) -> Channel {
    Channel {
        id,
        name: format!("bench-{id}"),
        channel_type: ChannelType::OpenAI,
        key: String::new(),
        base_url: None,
        groups: vec!["default".into()],
        models: vec!["gpt-4o".into(), "claude-3-*".into()],
        weight: u32::try_from(id % 7 + 1).unwrap_or(1),
        priority,
        status: ChannelStatus::Enabled,
        only_chat: false,
        disabled_stream: Vec::new(),
    }
}

struct StaticStore(Vec<Channel>);

#[async_trait]
impl ChannelStore for StaticStore {
    async fn fetch_enabled_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.0.clone())
    }

    async fn get_channel_by_id(&self, channel_id: i32) -> Result<Option<Channel>> {
        Ok(self.0.iter().find(|c| c.id == channel_id).cloned())
    }

    async fn update_channel_status(&self, _channel_id: i32, _status: ChannelStatus) -> Result<bool> {
        Ok(true)
    }
}

fn balancer_benchmark(c: &mut Criterion) {
    let cooldowns = Arc::new(CooldownTracker::new(60));
    let balancer = WeightedBalancer::new(Arc::clone(&cooldowns));
    let channels: HashMap<i32, Arc<ChannelChoice>> = (1..=64)
        .map(|id| (id, Arc::new(ChannelChoice::new(channel(id, 0)))))
        .collect();
    let tier: Vec<i32> = (1..=64).collect();
    for id in (1..=64).step_by(4) {
        cooldowns.set_cooldown(id, "gpt-4o");
    }

    c.bench_function("balancer_pick_64", |b| {
        b.iter(|| balancer.pick(black_box(&tier), &channels, "gpt-4o", &[]));
    });

    let filters: Vec<Box<dyn ChannelFilter>> =
        vec![Box::new(ExcludeChannelIds((1..=32).collect::<HashSet<_>>()))];
    c.bench_function("balancer_pick_64_excluded", |b| {
        b.iter(|| balancer.pick(black_box(&tier), &channels, "gpt-4o", &filters));
    });
}

fn registry_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(StaticStore(
        (1..=200).map(|id| channel(id, i64::from(id % 3))).collect(),
    ));
    let registry = ChannelRegistry::new(
        store,
        Arc::new(CooldownTracker::new(60)),
        RegistryOptions::default(),
    );
    rt.block_on(registry.load()).unwrap();

    c.bench_function("registry_next_exact", |b| {
        b.iter(|| registry.next(black_box("default"), black_box("gpt-4o"), &[]));
    });

    c.bench_function("registry_next_wildcard", |b| {
        b.iter(|| registry.next(black_box("default"), black_box("claude-3-opus"), &[]));
    });

    c.bench_function("registry_reload_200", |b| {
        b.iter(|| rt.block_on(registry.load()).unwrap());
    });
}

criterion_group!(benches, balancer_benchmark, registry_benchmark);
criterion_main!(benches);
