//! Notification dispatch: dedup, in-app record, multi-channel fan-out.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::SharedCache;
use crate::channels::{Channels, DeliveryReport, OutgoingMessage};
use crate::clock::SharedClock;
use crate::db::Db;
use crate::error::{AppError, Result};
use crate::models::{parse_id, Audience, Notification, NotificationSettings, User};

/// Identity of a logical notification for dedup purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Progress {
        enrollment_id: Uuid,
        module_id: Uuid,
        lesson_id: Uuid,
    },
    CourseCompleted {
        enrollment_id: Uuid,
    },
    QuizSubmitted {
        submission_id: Uuid,
    },
    HomeworkGraded {
        submission_id: Uuid,
    },
    Deadline {
        homework_id: Uuid,
        days_left: i64,
    },
    /// Raw message text. Two events with the same wording collide, and a
    /// wording change defeats the dedup window.
    Message(String),
}

impl Fingerprint {
    pub fn template(&self) -> &'static str {
        match self {
            Fingerprint::Progress { .. } => "progress",
            Fingerprint::CourseCompleted { .. } => "course-completed",
            Fingerprint::QuizSubmitted { .. } => "quiz-submitted",
            Fingerprint::HomeworkGraded { .. } => "homework-graded",
            Fingerprint::Deadline { .. } => "deadline",
            Fingerprint::Message(_) => "message",
        }
    }

    pub fn cache_key(&self, user_id: Uuid) -> String {
        let context = match self {
            Fingerprint::Progress {
                enrollment_id,
                module_id,
                lesson_id,
            } => format!("progress:{enrollment_id}:{module_id}:{lesson_id}"),
            Fingerprint::CourseCompleted { enrollment_id } => {
                format!("course-completed:{enrollment_id}")
            }
            Fingerprint::QuizSubmitted { submission_id } => format!("quiz:{submission_id}"),
            Fingerprint::HomeworkGraded { submission_id } => {
                format!("homework-graded:{submission_id}")
            }
            Fingerprint::Deadline {
                homework_id,
                days_left,
            } => format!("deadline:{homework_id}:{days_left}"),
            Fingerprint::Message(message) => message.clone(),
        };
        format!("notification:{user_id}:{context}")
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub user_id: Uuid,
    pub title: Option<String>,
    pub message: String,
    pub fingerprint: Fingerprint,
    /// Overrides the user's stored preferences when present
    pub settings: Option<NotificationSettings>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Already sent within the dedup window
    Deduplicated,
    RecipientMissing,
    Dispatched {
        notification_id: Uuid,
        report: DeliveryReport,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BulkNotificationReq {
    pub title: Option<String>,
    pub message: String,
    pub recipients: Vec<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RecipientFailure {
    pub user_id: Uuid,
    pub reason: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BulkDispatch {
    pub notification: Notification,
    pub failures: Vec<RecipientFailure>,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
    cache: SharedCache,
    channels: Channels,
    clock: SharedClock,
    dedup_ttl: Duration,
}

impl NotificationService {
    pub fn new(
        db: Db,
        cache: SharedCache,
        channels: Channels,
        clock: SharedClock,
        dedup_ttl: Duration,
    ) -> Self {
        Self {
            db,
            cache,
            channels,
            clock,
            dedup_ttl,
        }
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    /// Progress notification keyed by raw message text.
    pub async fn notify_progress(
        &self,
        user_id: Uuid,
        message: &str,
        settings: Option<NotificationSettings>,
    ) -> Result<DispatchOutcome> {
        self.dispatch(DispatchRequest {
            user_id,
            title: Some("Progress update".to_string()),
            message: message.to_string(),
            fingerprint: Fingerprint::Message(message.to_string()),
            settings,
        })
        .await
    }

    /// Dedup, record, fan out. Channel failures are logged and reported in
    /// the outcome; only persistence failures are returned as errors.
    pub async fn dispatch(&self, req: DispatchRequest) -> Result<DispatchOutcome> {
        let key = req.fingerprint.cache_key(req.user_id);
        match self.cache.get(&key).await {
            Ok(Some(_)) => {
                tracing::debug!(user_id = %req.user_id, key, "notification deduplicated");
                return Ok(DispatchOutcome::Deduplicated);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "dedup lookup failed, sending anyway"),
        }

        let Some(user) = self.db.get::<User>(req.user_id).await? else {
            tracing::warn!(user_id = %req.user_id, "notification recipient not found");
            return Ok(DispatchOutcome::RecipientMissing);
        };

        let notification = Notification {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            message: req.message.clone(),
            key: Some(req.fingerprint.template().to_string()),
            audience: Audience::Single { user_id: user.id },
            is_read: false,
            is_sent: false,
            sent_at: None,
            created_at: self.clock.now(),
        };
        self.db.insert(&notification).await?;

        let settings = req.settings.unwrap_or(user.notification_settings);
        let message = OutgoingMessage {
            notification_id: Some(notification.id),
            title: req.title,
            body: req.message,
        };
        let report = self.channels.deliver(&user, &settings, &message).await;

        if let Err(e) = self.cache.set_ex(&key, "1", self.dedup_ttl).await {
            tracing::warn!(key, error = %e, "failed to write dedup key");
        }

        if report.attempted() > 0 {
            self.mark_sent(notification.id).await?;
        }

        tracing::info!(
            user_id = %user.id,
            notification_id = %notification.id,
            attempted = report.attempted(),
            delivered = report.delivered(),
            "notification dispatched"
        );
        Ok(DispatchOutcome::Dispatched {
            notification_id: notification.id,
            report,
        })
    }

    /// Fire-and-forget dispatch for request paths that must not fail (or
    /// wait) on notification delivery.
    pub fn spawn_dispatch(&self, req: DispatchRequest) {
        let svc = self.clone();
        tokio::spawn(async move {
            let user_id = req.user_id;
            let template = req.fingerprint.template();
            if let Err(e) = svc.dispatch(req).await {
                tracing::error!(%user_id, template, error = %e, "background notification failed");
            }
        });
    }

    /// One record for many recipients. `isSent` means dispatch was attempted
    /// for every recipient, not that every delivery succeeded.
    pub async fn create_bulk(&self, req: BulkNotificationReq) -> Result<BulkDispatch> {
        if req.message.trim().is_empty() {
            return Err(AppError::validation("message is required"));
        }
        if req.recipients.is_empty() {
            return Err(AppError::validation("recipients must not be empty"));
        }
        let mut recipients = Vec::with_capacity(req.recipients.len());
        for r in &req.recipients {
            let id = parse_id("recipients", r)?;
            if !recipients.contains(&id) {
                recipients.push(id);
            }
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            message: req.message.clone(),
            key: Some("bulk".to_string()),
            audience: Audience::Bulk {
                recipients: recipients.clone(),
            },
            is_read: false,
            is_sent: false,
            sent_at: None,
            created_at: self.clock.now(),
        };
        self.db.insert(&notification).await?;

        let message = OutgoingMessage {
            notification_id: Some(notification.id),
            title: req.title,
            body: req.message,
        };
        let results = join_all(
            recipients
                .iter()
                .map(|user_id| self.deliver_to(*user_id, &message)),
        )
        .await;
        let failures: Vec<RecipientFailure> = results.into_iter().flatten().collect();
        for f in &failures {
            tracing::warn!(
                notification_id = %notification.id,
                user_id = %f.user_id,
                reason = %f.reason,
                "bulk notification recipient failed"
            );
        }

        let notification = self
            .mark_sent(notification.id)
            .await?
            .ok_or_else(|| AppError::not_found("notification", notification.id))?;
        Ok(BulkDispatch {
            notification,
            failures,
        })
    }

    async fn deliver_to(&self, user_id: Uuid, message: &OutgoingMessage) -> Option<RecipientFailure> {
        let user = match self.db.get::<User>(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                return Some(RecipientFailure {
                    user_id,
                    reason: "user not found".to_string(),
                })
            }
            Err(e) => {
                return Some(RecipientFailure {
                    user_id,
                    reason: e.to_string(),
                })
            }
        };
        let report = self
            .channels
            .deliver(&user, &user.notification_settings, message)
            .await;
        report.into_result().err().map(|e| RecipientFailure {
            user_id,
            reason: e.to_string(),
        })
    }

    async fn mark_sent(&self, id: Uuid) -> Result<Option<Notification>> {
        let now = self.clock.now();
        Ok(self
            .db
            .set_fields::<Notification>(id, json!({ "isSent": true, "sentAt": now }))
            .await?)
    }

    /// Single-recipient and bulk notifications addressed to the user.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut all = self
            .db
            .find::<Notification>(json!({ "userId": user_id }))
            .await?;
        all.extend(
            self.db
                .find::<Notification>(json!({ "recipients": [user_id] }))
                .await?,
        );
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        Ok(self
            .db
            .count::<Notification>(json!({ "userId": user_id, "isRead": false }))
            .await?)
    }

    async fn owned(&self, id: &str, user_id: Uuid) -> Result<Notification> {
        let id = parse_id("id", id)?;
        self.db
            .get::<Notification>(id)
            .await?
            .filter(|n| n.is_addressed_to(user_id))
            .ok_or_else(|| AppError::not_found("notification", id))
    }

    pub async fn mark_as_read(&self, id: &str, user_id: Uuid) -> Result<Notification> {
        let n = self.owned(id, user_id).await?;
        self.db
            .set_fields::<Notification>(n.id, json!({ "isRead": true }))
            .await?
            .ok_or_else(|| AppError::not_found("notification", n.id))
    }

    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64> {
        let unread = self
            .db
            .find::<Notification>(json!({ "userId": user_id, "isRead": false }))
            .await?;
        let mut marked = 0;
        for n in unread {
            if self
                .db
                .set_fields::<Notification>(n.id, json!({ "isRead": true }))
                .await?
                .is_some()
            {
                marked += 1;
            }
        }
        Ok(marked)
    }

    pub async fn delete(&self, id: &str, user_id: Uuid) -> Result<()> {
        let n = self.owned(id, user_id).await?;
        self.db.delete::<Notification>(n.id).await?;
        Ok(())
    }

    pub async fn delete_any(&self, id: &str) -> Result<()> {
        let id = parse_id("id", id)?;
        if !self.db.delete::<Notification>(id).await? {
            return Err(AppError::not_found("notification", id));
        }
        Ok(())
    }
}
