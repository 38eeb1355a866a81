//! Slack chat platform.
//!
//! Posts through the Web API `chat.postMessage` method with a bot token.
//! Slack answers logical errors with HTTP 200 and `"ok": false`, so the body
//! is always inspected.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use paperbot_core::defaults;
use paperbot_core::{ChannelId, ChatPlatform, Error, Result};

/// Slack client configuration.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub token: String,
    /// Web API base, without trailing slash.
    pub api_base: String,
    pub timeout: Duration,
    /// Section block text limit.
    pub max_chars: usize,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

impl SlackConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: defaults::SLACK_API_BASE.to_string(),
            timeout: Duration::from_secs(defaults::SLACK_TIMEOUT_SECS),
            max_chars: defaults::SLACK_SECTION_MAX_CHARS,
        }
    }

    /// Load from `SLACK_BOT_TOKEN` (required) and `SLACK_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("SLACK_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("SLACK_BOT_TOKEN is not set".to_string()))?;

        let mut config = Self::new(token.trim());
        if let Ok(base) = std::env::var("SLACK_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Truncate `text` to at most `max` characters, marking the cut with `…`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    /// Notification fallback for clients that do not render blocks.
    text: &'a str,
    blocks: Vec<Block<'a>>,
    unfurl_links: bool,
    unfurl_media: bool,
}

#[derive(Debug, Serialize)]
struct Block<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: BlockText<'a>,
}

#[derive(Debug, Serialize)]
struct BlockText<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Slack implementation of [`ChatPlatform`].
pub struct SlackClient {
    client: Client,
    config: SlackConfig,
}

impl SlackClient {
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "sources",
            component = "slack",
            api_base = %config.api_base,
            "Initializing Slack client"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(SlackConfig::from_env()?)
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    #[instrument(skip(self, text), fields(subsystem = "sources", component = "slack", op = "post_message", channel = %channel))]
    async fn post_message(&self, channel: &ChannelId, text: &str) -> Result<()> {
        let text = truncate_chars(text, self.config.max_chars);
        let request = PostMessageRequest {
            channel: channel.as_str(),
            text: &text,
            blocks: vec![Block {
                kind: "section",
                text: BlockText {
                    kind: "mrkdwn",
                    text: &text,
                },
            }],
            unfurl_links: false,
            unfurl_media: false,
        };

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.config.api_base))
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Dispatch(format!("Slack request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Dispatch(format!("Slack returned {}: {}", status, body)));
        }

        let result: SlackResponse = response
            .json()
            .await
            .map_err(|e| Error::Dispatch(format!("Invalid Slack response: {}", e)))?;

        if !result.ok {
            return Err(Error::Dispatch(format!(
                "Slack rejected message: {}",
                result.error.as_deref().unwrap_or("unknown_error")
            )));
        }

        debug!("Message posted");
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("ééééé", 3).chars().count(), 3);
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = SlackConfig::new("xoxb-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("xoxb-secret"));
    }

    #[test]
    fn test_with_api_base_trims_slash() {
        let config = SlackConfig::new("t").with_api_base("http://localhost:1234/api/");
        assert_eq!(config.api_base, "http://localhost:1234/api");
    }

    #[test]
    fn test_request_shape() {
        let request = PostMessageRequest {
            channel: "#papers",
            text: "hi",
            blocks: vec![Block {
                kind: "section",
                text: BlockText {
                    kind: "mrkdwn",
                    text: "hi",
                },
            }],
            unfurl_links: false,
            unfurl_media: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["blocks"][0]["type"], "section");
        assert_eq!(json["blocks"][0]["text"]["type"], "mrkdwn");
        assert_eq!(json["channel"], "#papers");
    }
}
