//! SMS gateway delivery.

use async_trait::async_trait;
use serde_json::json;

use super::{ChannelError, ChannelKind, NotificationChannel, OutgoingMessage};
use crate::config::SmsConfig;

pub struct SmsChannel {
    http: reqwest::Client,
    config: SmsConfig,
}

impl SmsChannel {
    pub fn new(http: reqwest::Client, config: SmsConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError> {
        let res = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.sender,
                "to": target,
                "text": message.body,
            }))
            .send()
            .await
            .map_err(|e| ChannelError::delivery(ChannelKind::Sms, e))?;

        if !res.status().is_success() {
            return Err(ChannelError::Rejected {
                channel: ChannelKind::Sms,
                status: res.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_to_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "to": "+998901234567", "from": "LMS" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ch = SmsChannel::new(
            reqwest::Client::new(),
            SmsConfig {
                api_url: server.uri(),
                api_key: "k".into(),
                sender: "LMS".into(),
            },
        );
        let msg = OutgoingMessage {
            notification_id: None,
            title: None,
            body: "Quiz graded".into(),
        };
        ch.send("+998901234567", &msg).await.unwrap();
    }
}
