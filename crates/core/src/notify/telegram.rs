use crate::config::Settings;
use crate::domain::recipient::DestinationId;
use crate::notify::{DeliveryResult, Notifier};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: Option<String>,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramNotifier {
    /// A missing bot token is not an error here; `send` turns into a logged no-op.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::new(
            settings.telegram_bot_token.clone(),
            DEFAULT_BASE_URL,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn new(
        bot_token: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            http,
            bot_token: bot_token.filter(|t| !t.trim().is_empty()),
            base_url: base_url.into(),
        })
    }

    async fn send_message(&self, token: &str, chat_id: &str, html: &str) -> anyhow::Result<Option<i64>> {
        let url = format!("{}/bot{}/sendMessage", self.base_url.trim_end_matches('/'), token);
        let req = SendMessageRequest {
            chat_id,
            text: html,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        // The URL embeds the token; keep it out of error text.
        let res = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("telegram request failed: {}", e.without_url()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read telegram response: {}", e.without_url()))?;
        let parsed = serde_json::from_str::<ApiResponse>(&text).with_context(|| {
            format!(
                "telegram HTTP {status} returned non-JSON body: {}",
                text.chars().take(200).collect::<String>()
            )
        })?;

        if !status.is_success() || !parsed.ok {
            anyhow::bail!(
                "telegram HTTP {status}: {}",
                parsed.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        Ok(parsed.result.map(|m| m.message_id))
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    fn channel_name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, destination: &DestinationId, html: &str) -> DeliveryResult {
        let Some(token) = self.bot_token.as_deref() else {
            tracing::warn!("TELEGRAM_BOT_TOKEN not set; skipping delivery");
            return DeliveryResult::Skipped {
                reason: "missing bot token".to_string(),
            };
        };
        if destination.is_empty() {
            tracing::warn!("empty destination; skipping delivery");
            return DeliveryResult::Skipped {
                reason: "empty destination".to_string(),
            };
        }

        match self.send_message(token, destination.as_str().trim(), html).await {
            Ok(message_id) => {
                tracing::info!(%destination, ?message_id, "order sheet delivered");
                DeliveryResult::Delivered { message_id }
            }
            Err(err) => {
                tracing::error!(%destination, error = %format!("{err:#}"), "order sheet delivery failed");
                DeliveryResult::Failed {
                    detail: format!("{err:#}"),
                }
            }
        }
    }
}
