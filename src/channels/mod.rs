//! Notification delivery channels.
//!
//! Each channel is an independent, fallible collaborator. `Channels::deliver`
//! attempts every channel a user has enabled and is addressable on, and never
//! lets one channel's failure stop the others.

pub mod email;
pub mod sms;
pub mod telegram;

pub use self::email::EmailChannel;
pub use self::sms::SmsChannel;
pub use self::telegram::TelegramChannel;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{NotificationSettings, User};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Telegram,
    Sms,
    Websocket,
}

impl ChannelKind {
    pub fn enabled_in(&self, settings: &NotificationSettings) -> bool {
        match self {
            ChannelKind::Email => settings.email,
            ChannelKind::Telegram => settings.telegram,
            ChannelKind::Sms => settings.sms,
            ChannelKind::Websocket => settings.websocket,
        }
    }

    /// The user's address on this channel, if they have one.
    pub fn address(&self, user: &User) -> Option<String> {
        let addr = match self {
            ChannelKind::Email => Some(user.email.clone()),
            ChannelKind::Telegram => user.telegram_id.clone(),
            ChannelKind::Sms => user.phone.clone(),
            ChannelKind::Websocket => Some(user.id.to_string()),
        };
        addr.filter(|a| !a.trim().is_empty())
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Email => "email",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Sms => "sms",
            ChannelKind::Websocket => "websocket",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub notification_id: Option<Uuid>,
    pub title: Option<String>,
    pub body: String,
}

impl OutgoingMessage {
    pub fn subject(&self) -> &str {
        self.title.as_deref().unwrap_or("Notification")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{channel} delivery failed: {message}")]
    Delivery {
        channel: ChannelKind,
        message: String,
    },
    #[error("{channel} provider rejected the message with status {status}")]
    Rejected { channel: ChannelKind, status: u16 },
    #[error("all {} attempted channels failed for user {user_id}", .failures.len())]
    AllFailed {
        user_id: Uuid,
        failures: Vec<(ChannelKind, String)>,
    },
}

impl ChannelError {
    pub(crate) fn delivery(channel: ChannelKind, e: impl fmt::Display) -> Self {
        Self::Delivery {
            channel,
            message: e.to_string(),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone)]
pub struct ChannelAttempt {
    pub channel: ChannelKind,
    pub error: Option<String>,
}

/// What happened on each channel for one recipient.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub user_id: Uuid,
    pub attempts: Vec<ChannelAttempt>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.attempts.len()
    }

    pub fn delivered(&self) -> usize {
        self.attempts.iter().filter(|a| a.error.is_none()).count()
    }

    /// Combined error only when every attempted channel failed.
    pub fn into_result(self) -> Result<Self, ChannelError> {
        if self.attempted() > 0 && self.delivered() == 0 {
            let failures = self
                .attempts
                .into_iter()
                .map(|a| (a.channel, a.error.unwrap_or_default()))
                .collect();
            return Err(ChannelError::AllFailed {
                user_id: self.user_id,
                failures,
            });
        }
        Ok(self)
    }
}

/// Registered channels, built once at startup and shared by reference.
#[derive(Clone, Default)]
pub struct Channels {
    list: Vec<Arc<dyn NotificationChannel>>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.list.push(channel);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn NotificationChannel>> {
        self.list.iter().find(|c| c.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.list.iter().map(|c| c.kind()).collect()
    }

    /// Attempts every eligible channel concurrently. Failures are logged and
    /// recorded in the report, never returned.
    pub async fn deliver(
        &self,
        user: &User,
        settings: &NotificationSettings,
        message: &OutgoingMessage,
    ) -> DeliveryReport {
        let eligible: Vec<(ChannelKind, String, &Arc<dyn NotificationChannel>)> = self
            .list
            .iter()
            .filter_map(|ch| {
                let kind = ch.kind();
                if !kind.enabled_in(settings) {
                    return None;
                }
                kind.address(user).map(|addr| (kind, addr, ch))
            })
            .collect();

        let attempts = join_all(eligible.into_iter().map(|(kind, addr, ch)| async move {
            let error = match ch.send(&addr, message).await {
                Ok(()) => {
                    tracing::debug!(user_id = %user.id, channel = %kind, "notification delivered");
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.id,
                        channel = %kind,
                        error = %e,
                        "notification channel failed"
                    );
                    Some(e.to_string())
                }
            };
            ChannelAttempt {
                channel: kind,
                error,
            }
        }))
        .await;

        DeliveryReport {
            user_id: user.id,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_user, RecordingChannel};

    #[tokio::test]
    async fn only_enabled_and_addressable_channels_are_attempted() {
        let email = RecordingChannel::new(ChannelKind::Email);
        let telegram = RecordingChannel::new(ChannelKind::Telegram);
        let sms = RecordingChannel::new(ChannelKind::Sms);
        let channels = Channels::new()
            .with(email.clone())
            .with(telegram.clone())
            .with(sms.clone());

        // telegram enabled but no telegram id; sms disabled by default
        let mut user = sample_user("a@example.com");
        user.phone = Some("+100".into());
        let msg = OutgoingMessage {
            notification_id: None,
            title: None,
            body: "hello".into(),
        };
        let report = channels
            .deliver(&user, &user.notification_settings, &msg)
            .await;

        assert_eq!(report.attempted(), 1);
        assert_eq!(email.sent().len(), 1);
        assert!(telegram.sent().is_empty());
        assert!(sms.sent().is_empty());
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_rest() {
        let email = RecordingChannel::failing(ChannelKind::Email);
        let ws = RecordingChannel::new(ChannelKind::Websocket);
        let channels = Channels::new().with(email.clone()).with(ws.clone());
        let user = sample_user("b@example.com");
        let msg = OutgoingMessage {
            notification_id: None,
            title: Some("t".into()),
            body: "x".into(),
        };

        let report = channels
            .deliver(&user, &user.notification_settings, &msg)
            .await;
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.delivered(), 1);
        assert_eq!(ws.sent().len(), 1);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn all_failed_is_aggregated() {
        let email = RecordingChannel::failing(ChannelKind::Email);
        let channels = Channels::new().with(email);
        let user = sample_user("c@example.com");
        let msg = OutgoingMessage {
            notification_id: None,
            title: None,
            body: "x".into(),
        };
        let report = channels
            .deliver(&user, &user.notification_settings, &msg)
            .await;
        match report.into_result() {
            Err(ChannelError::AllFailed { user_id, failures }) => {
                assert_eq!(user_id, user.id);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, ChannelKind::Email);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
