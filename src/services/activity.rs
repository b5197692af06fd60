//! Activity feed: persisted learning events, pushed live to course watchers.

use uuid::Uuid;

use crate::clock::SharedClock;
use crate::db::Db;
use crate::hub::{Hub, Topic};
use crate::models::{Activity, ActivityKind};

#[derive(Clone)]
pub struct ActivityLog {
    db: Db,
    hub: Hub,
    clock: SharedClock,
}

impl ActivityLog {
    pub fn new(db: Db, hub: Hub, clock: SharedClock) -> Self {
        Self { db, hub, clock }
    }

    /// Best effort: a failed write is logged and never fails the caller.
    pub async fn record(
        &self,
        user_id: Uuid,
        course_id: Uuid,
        kind: ActivityKind,
        message: impl Into<String>,
    ) {
        let activity = Activity {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            kind,
            message: message.into(),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.db.insert(&activity).await {
            tracing::warn!(%user_id, %course_id, ?kind, error = %e, "failed to record activity");
            return;
        }
        self.hub
            .publish(Topic::Activity(course_id), "activity-update", &activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use serde_json::{json, Value};
    use std::sync::Arc;

    #[tokio::test]
    async fn records_and_pushes_to_course_topic() {
        let db = Db::memory();
        let hub = Hub::new();
        let log = ActivityLog::new(db.clone(), hub.clone(), Arc::new(SystemClock));
        let course = Uuid::new_v4();
        let mut rx = hub.subscribe(Topic::Activity(course));

        log.record(Uuid::new_v4(), course, ActivityKind::QuizSubmitted, "quiz done")
            .await;

        assert_eq!(db.count::<Activity>(json!({ "courseId": course })).await.unwrap(), 1);
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "activity-update");
        assert_eq!(frame["data"]["kind"], "quiz-submitted");
    }
}
