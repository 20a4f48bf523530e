//! # Webhook 通知

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::Notifier;
use crate::error::{ProxyError, Result};
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    timestamp: i64,
}

/// 以 JSON POST 发送通知
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent("llm-gateway-notifier/1.0")
            .build()
            .map_err(|e| ProxyError::notification_with_source("创建通知 HTTP 客户端失败", e))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        let payload = WebhookPayload {
            subject,
            body,
            timestamp: Utc::now().timestamp(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProxyError::notification_with_source("发送 webhook 通知失败", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::notification(format!(
                "webhook 返回异常状态码 {status}"
            )));
        }

        ldebug!(
            "system",
            LogStage::Notification,
            LogComponent::Notifier,
            "webhook_sent",
            "webhook 通知已发送",
            subject = subject
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_json_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "subject": "渠道已禁用",
                "body": "原因: 401"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&format!("{}/hook", server.uri()), 5).unwrap();
        notifier.notify("渠道已禁用", "原因: 401").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&server.uri(), 5).unwrap();
        let err = notifier.notify("s", "b").await.unwrap_err();
        assert!(matches!(err, ProxyError::Notification { .. }));
    }
}
