//! # 渠道过滤器
//!
//! 过滤器返回 `true` 表示跳过该候选渠道，任一过滤器命中即跳过

use std::collections::HashSet;
use std::fmt::Debug;

use crate::channel::{ChannelChoice, ChannelType};

/// 候选渠道过滤器
pub trait ChannelFilter: Send + Sync + Debug {
    /// 是否跳过该渠道
    fn should_skip(&self, choice: &ChannelChoice) -> bool;

    /// 过滤器名称，用于日志
    fn name(&self) -> &'static str;
}

/// 排除指定 id 的渠道
#[derive(Debug, Clone, Default)]
pub struct ExcludeChannelIds(pub HashSet<i32>);

impl ChannelFilter for ExcludeChannelIds {
    fn should_skip(&self, choice: &ChannelChoice) -> bool {
        self.0.contains(&choice.channel.id)
    }

    fn name(&self) -> &'static str {
        "exclude_channel_ids"
    }
}

/// 仅保留指定类型的渠道
#[derive(Debug, Clone)]
pub struct AllowChannelTypes(pub Vec<ChannelType>);

impl ChannelFilter for AllowChannelTypes {
    fn should_skip(&self, choice: &ChannelChoice) -> bool {
        !self.0.contains(&choice.channel.channel_type)
    }

    fn name(&self) -> &'static str {
        "allow_channel_types"
    }
}

/// 跳过仅限聊天接口的渠道
#[derive(Debug, Clone, Copy)]
pub struct SkipOnlyChat;

impl ChannelFilter for SkipOnlyChat {
    fn should_skip(&self, choice: &ChannelChoice) -> bool {
        choice.channel.only_chat
    }

    fn name(&self) -> &'static str {
        "skip_only_chat"
    }
}

/// 流式请求时跳过不支持该模型流式输出的渠道
#[derive(Debug, Clone)]
pub struct RequireStreamSupport {
    pub model: String,
}

impl ChannelFilter for RequireStreamSupport {
    fn should_skip(&self, choice: &ChannelChoice) -> bool {
        !choice.channel.allow_stream(&self.model)
    }

    fn name(&self) -> &'static str {
        "require_stream_support"
    }
}

/// 过滤器链
pub type FilterChain = [Box<dyn ChannelFilter>];

/// 按过滤链判断是否跳过
#[must_use]
pub fn is_filtered(filters: &FilterChain, choice: &ChannelChoice) -> bool {
    filters.iter().any(|filter| filter.should_skip(choice))
}

/// 请求级别的过滤选项，每次选择时与排除集合合成过滤链
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// 跳过仅聊天渠道
    pub skip_only_chat: bool,
    /// 允许的渠道类型，`None` 表示不限
    pub allowed_types: Option<Vec<ChannelType>>,
    /// 流式请求的模型名
    pub stream_model: Option<String>,
}

impl FilterOptions {
    /// 构建过滤链
    #[must_use]
    pub fn build(&self, excluded: &HashSet<i32>) -> Vec<Box<dyn ChannelFilter>> {
        let mut filters: Vec<Box<dyn ChannelFilter>> = Vec::with_capacity(4);

        if self.skip_only_chat {
            filters.push(Box::new(SkipOnlyChat));
        }
        if !excluded.is_empty() {
            filters.push(Box::new(ExcludeChannelIds(excluded.clone())));
        }
        if let Some(types) = &self.allowed_types {
            filters.push(Box::new(AllowChannelTypes(types.clone())));
        }
        if let Some(model) = &self.stream_model {
            filters.push(Box::new(RequireStreamSupport {
                model: model.clone(),
            }));
        }

        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChannelBuilder;

    #[test]
    fn test_exclude_ids() {
        let choice = ChannelChoice::new(ChannelBuilder::new(3).build());
        let filter = ExcludeChannelIds(HashSet::from([3]));
        assert!(filter.should_skip(&choice));
        assert!(!ExcludeChannelIds::default().should_skip(&choice));
    }

    #[test]
    fn test_allow_types() {
        let choice = ChannelChoice::new(ChannelBuilder::new(1).channel_type(ChannelType::Gemini).build());
        assert!(!AllowChannelTypes(vec![ChannelType::Gemini]).should_skip(&choice));
        assert!(AllowChannelTypes(vec![ChannelType::OpenAI]).should_skip(&choice));
    }

    #[test]
    fn test_only_chat_and_stream() {
        let choice = ChannelChoice::new(
            ChannelBuilder::new(1)
                .only_chat(true)
                .disabled_stream(&["gpt-4o"])
                .build(),
        );
        assert!(SkipOnlyChat.should_skip(&choice));
        assert!(RequireStreamSupport { model: "gpt-4o".into() }.should_skip(&choice));
        assert!(!RequireStreamSupport { model: "gpt-4o-mini".into() }.should_skip(&choice));
    }

    #[test]
    fn test_build_chain() {
        let options = FilterOptions {
            skip_only_chat: true,
            allowed_types: Some(vec![ChannelType::OpenAI]),
            stream_model: Some("gpt-4o".into()),
        };
        let chain = options.build(&HashSet::from([5]));
        let names: Vec<_> = chain.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec!["skip_only_chat", "exclude_channel_ids", "allow_channel_types", "require_stream_support"]
        );

        let open = ChannelChoice::new(ChannelBuilder::new(1).build());
        assert!(!is_filtered(&chain, &open));
        let excluded = ChannelChoice::new(ChannelBuilder::new(5).build());
        assert!(is_filtered(&chain, &excluded));

        assert!(FilterOptions::default().build(&HashSet::new()).is_empty());
    }
}
