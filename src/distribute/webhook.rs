use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{format_line, Delivery, Distributor};
use crate::item::NewsItem;
use crate::retry::{with_retry, Cancel, RetryPolicy, Transient};

/// Payload shape of the receiving webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookFlavor {
    #[default]
    Discord,
    Slack,
    /// Raw item JSON plus the rendered line.
    Json,
}

#[derive(Debug, Error)]
enum PostError {
    #[error("webhook request failed: {0}")]
    Request(String),
    #[error("webhook HTTP {0}")]
    Status(u16),
    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),
}

impl Transient for PostError {
    fn is_transient(&self) -> bool {
        match self {
            PostError::Request(_) | PostError::Timeout(_) => true,
            PostError::Status(code) => *code == 429 || *code >= 500,
        }
    }

    fn timed_out(after: Duration) -> Self {
        PostError::Timeout(after)
    }
}

#[derive(Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: String,
    url: Option<&'a str>,
}

#[derive(Serialize)]
struct DiscordWebhookPayload<'a> {
    content: Option<String>,
    embeds: Vec<DiscordEmbed<'a>>,
}

/// Posts one message per item so a failure stays scoped to that item.
#[derive(Clone)]
pub struct WebhookDistributor {
    webhook: String,
    client: Client,
    flavor: WebhookFlavor,
    retry: RetryPolicy,
}

impl WebhookDistributor {
    pub fn new(webhook: String, flavor: WebhookFlavor) -> Self {
        Self {
            webhook,
            client: Client::new(),
            flavor,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn payload(&self, rank: usize, item: &NewsItem) -> serde_json::Value {
        let line = format_line(rank, item);
        match self.flavor {
            WebhookFlavor::Discord => {
                let p = DiscordWebhookPayload {
                    content: None,
                    embeds: vec![DiscordEmbed {
                        title: &item.title,
                        description: line,
                        url: item.url.as_deref(),
                    }],
                };
                serde_json::to_value(p).unwrap_or_default()
            }
            WebhookFlavor::Slack => serde_json::json!({ "text": line }),
            WebhookFlavor::Json => serde_json::json!({ "rank": rank, "line": line, "item": item }),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<(), PostError> {
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(Duration::from_millis(self.retry.attempt_timeout_ms.max(1)))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PostError::Timeout(Duration::from_millis(self.retry.attempt_timeout_ms))
                } else {
                    PostError::Request(e.to_string())
                }
            })?;
        if !rsp.status().is_success() {
            return Err(PostError::Status(rsp.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Distributor for WebhookDistributor {
    async fn distribute(&self, batch: &[NewsItem]) -> Vec<Delivery> {
        let cancel = Cancel::never();
        let mut out = Vec::with_capacity(batch.len());
        for (i, item) in batch.iter().enumerate() {
            let body = self.payload(i + 1, item);
            let res = with_retry(&self.retry, &cancel, |_| self.post(&body)).await;
            out.push(match res {
                Ok(()) => Delivery::ok(&item.identity),
                Err(ex) => {
                    tracing::warn!(
                        target: "distribute",
                        identity = %item.identity,
                        attempts = ex.attempts,
                        error = %ex.last,
                        "webhook delivery failed"
                    );
                    Delivery::failed(&item.identity, ex.last.to_string())
                }
            });
        }
        out
    }

    fn name(&self) -> &str {
        match self.flavor {
            WebhookFlavor::Discord => "discord",
            WebhookFlavor::Slack => "slack",
            WebhookFlavor::Json => "webhook",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn payload_shapes() {
        let item = NewsItem::candidate(
            "Src",
            "Apple stock hits record",
            "",
            Some("https://x.test/a".into()),
            Utc::now(),
            Utc::now(),
        );
        let d = WebhookDistributor::new("http://127.0.0.1:9/hook".into(), WebhookFlavor::Discord);
        let p = d.payload(1, &item);
        assert_eq!(p["embeds"][0]["title"], "Apple stock hits record");
        assert_eq!(p["embeds"][0]["url"], "https://x.test/a");

        let s = WebhookDistributor::new("http://127.0.0.1:9/hook".into(), WebhookFlavor::Slack);
        assert!(s.payload(2, &item)["text"].as_str().unwrap().starts_with("[2.]"));
    }

    #[tokio::test]
    async fn unreachable_webhook_fails_per_item() {
        // port 9 (discard) is closed on test hosts; connection is refused
        let d = WebhookDistributor::new("http://127.0.0.1:9/hook".into(), WebhookFlavor::Slack)
            .with_retry(RetryPolicy::immediate(1));
        let item = NewsItem::candidate("Src", "Apple stock hits record", "", None, Utc::now(), Utc::now());
        let out = d.distribute(&[item.clone()]).await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].delivered());
        assert_eq!(out[0].identity, item.identity);
    }
}
