//! Telegram Bot API `sendMessage`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChannelError, ChannelKind, NotificationChannel, OutgoingMessage};
use crate::config::TelegramConfig;

pub struct TelegramChannel {
    http: reqwest::Client,
    config: TelegramConfig,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(http: reqwest::Client, config: TelegramConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError> {
        let text = match &message.title {
            Some(title) => format!("{}\n\n{}", title, message.body),
            None => message.body.clone(),
        };
        let res = self
            .http
            .post(self.endpoint())
            .json(&json!({ "chat_id": target, "text": text }))
            .send()
            .await
            .map_err(|e| ChannelError::delivery(ChannelKind::Telegram, e))?;

        let status = res.status();
        let body: BotResponse = res
            .json()
            .await
            .map_err(|e| ChannelError::delivery(ChannelKind::Telegram, e))?;
        if !status.is_success() || !body.ok {
            return Err(ChannelError::Delivery {
                channel: ChannelKind::Telegram,
                message: body
                    .description
                    .unwrap_or_else(|| format!("status {}", status.as_u16())),
            });
        }
        Ok(())
    }
}
