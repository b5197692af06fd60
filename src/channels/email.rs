//! Email delivery through an HTTP mail relay.

use async_trait::async_trait;
use serde_json::json;

use super::{ChannelError, ChannelKind, NotificationChannel, OutgoingMessage};
use crate::config::EmailConfig;

pub struct EmailChannel {
    http: reqwest::Client,
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(http: reqwest::Client, config: EmailConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError> {
        let res = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from,
                "to": target,
                "subject": message.subject(),
                "text": message.body,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::delivery(ChannelKind::Email, e))?;

        if !res.status().is_success() {
            return Err(ChannelError::Rejected {
                channel: ChannelKind::Email,
                status: res.status().as_u16(),
            });
        }
        Ok(())
    }
}
