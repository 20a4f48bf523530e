//! # 用户可见错误整理
//!
//! 重试结束后只把最后一次失败返回给客户端，并隐藏上游计费相关措辞与上游请求 id

use regex::Regex;
use std::sync::LazyLock;

use super::types::UpstreamError;

/// 上游饱和提示（429）
pub const GROUP_SATURATED_MESSAGE: &str = "当前分组上游负载已饱和，请稍后再试";
/// 计费类错误替换后的提示
pub const SATURATED_MESSAGE: &str = "上游负载已饱和，请稍后再试";

const QUOTA_KEYWORDS: &[&str] = &["余额", "额度", "quota", "无可用渠道", "令牌"];

static REQUEST_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\(request id: [^)]+\)").ok());

/// 在消息末尾附加请求 id
#[must_use]
pub fn message_with_request_id(message: &str, request_id: &str) -> String {
    format!("{message} (request id: {request_id})")
}

fn strip_request_ids(message: &str) -> String {
    match REQUEST_ID_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "").trim_end().to_string(),
        None => message.to_string(),
    }
}

/// 整理返回给客户端的错误
#[must_use]
pub fn filter_upstream_error(err: &UpstreamError, request_id: &str) -> UpstreamError {
    let mut filtered = err.clone();

    if filtered.status_code == 429 {
        filtered.error.message = GROUP_SATURATED_MESSAGE.to_string();
    }

    if filtered.error.message.contains("(request id:") {
        filtered.error.message = strip_request_ids(&filtered.error.message);
    }
    filtered.error.message = message_with_request_id(&filtered.error.message, request_id);

    let system_type = (!filtered.local && filtered.error.error_type == "one_hub_error")
        || filtered.error.error_type.ends_with("_api_error");
    if system_type {
        filtered.error.error_type = "system_error".to_string();
        if QUOTA_KEYWORDS
            .iter()
            .any(|keyword| filtered.error.message.contains(keyword))
        {
            filtered.error.message = SATURATED_MESSAGE.to_string();
            filtered.status_code = 429;
        }
    }

    if filtered.code() == Some("bad_response_status_code")
        && !filtered.error.message.contains("bad response status code")
    {
        filtered.error.message = format!(
            "Provider API error: bad response status code {}",
            filtered.param().unwrap_or_default()
        );
    }

    filtered
}
