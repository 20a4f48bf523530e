//! # 模型名匹配
//!
//! 精确匹配、大小写不敏感匹配以及 `*` 结尾的前缀通配匹配

use std::collections::HashMap;

/// 模型名是否为通配模式
#[must_use]
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.ends_with('*')
}

/// 在给定的通配模式中查找与模型匹配的一项，最长前缀优先
pub fn match_wildcard<'a, I>(patterns: I, model: &str, case_insensitive: bool) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let model_lower = case_insensitive.then(|| model.to_lowercase());

    patterns
        .into_iter()
        .filter_map(|pattern| {
            let prefix = pattern.strip_suffix('*')?;
            let matched = model_lower.as_ref().map_or_else(
                || model.starts_with(prefix),
                |lower| lower.starts_with(&prefix.to_lowercase()),
            );
            matched.then_some((prefix.len(), pattern.as_str()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, pattern)| pattern)
}

/// 将请求的模型名解析为分组内实际路由的模型键
///
/// 顺序：精确匹配；开启大小写不敏感时先做忽略大小写的精确匹配，
/// 再做忽略大小写的通配匹配；最后做区分大小写的通配匹配
pub fn resolve_model<'a, V>(
    group_models: &'a HashMap<String, V>,
    wildcards: &'a [String],
    model: &str,
    case_insensitive: bool,
) -> Option<&'a str> {
    if let Some((key, _)) = group_models.get_key_value(model) {
        return Some(key.as_str());
    }

    let routed_wildcards = || {
        wildcards
            .iter()
            .filter(|pattern| group_models.contains_key(pattern.as_str()))
    };

    if case_insensitive {
        let model_lower = model.to_lowercase();
        let mut exact: Vec<&String> = group_models
            .keys()
            .filter(|key| key.to_lowercase() == model_lower)
            .collect();
        exact.sort();
        if let Some(key) = exact.first() {
            return Some(key.as_str());
        }

        if let Some(pattern) = match_wildcard(routed_wildcards(), model, true) {
            return Some(pattern);
        }
    }

    match_wildcard(routed_wildcards(), model, false)
}
