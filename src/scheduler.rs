//! Deadline reminder scheduler.
//!
//! Periodically sweeps active homeworks with a deadline in the coming week
//! and reminds every enrolled student who has not submitted yet. Reminders go
//! through the regular dispatch path, keyed by `(homework, daysLeft)`.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::db::Db;
use crate::error::Result;
use crate::models::{Enrollment, Homework, HomeworkSubmission};
use crate::services::notifications::{
    DispatchOutcome, DispatchRequest, Fingerprint, NotificationService,
};

/// Reminders start this many days before the deadline.
pub const REMINDER_WINDOW_DAYS: i64 = 7;

const SECS_PER_DAY: i64 = 86_400;

/// Whole days left until `deadline`, rounded up. Zero or negative once it
/// has passed.
pub fn days_left(deadline: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> i64 {
    let secs = (deadline - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + SECS_PER_DAY - 1) / SECS_PER_DAY
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub homeworks_due: usize,
    pub reminders_sent: usize,
    pub deduplicated: usize,
    pub failed_homeworks: usize,
}

pub struct DeadlineScheduler {
    db: Db,
    notifications: NotificationService,
    clock: SharedClock,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl DeadlineScheduler {
    pub fn new(
        db: Db,
        notifications: NotificationService,
        clock: SharedClock,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            notifications,
            clock,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "deadline scheduler started");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("deadline scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.scan().await {
                        Ok(report) => info!(?report, "deadline scan finished"),
                        Err(e) => error!(error = %e, "deadline scan failed"),
                    }
                }
            }
        }
    }

    /// One sweep. Only the homework listing itself can fail the scan; a
    /// failing homework is logged and counted.
    pub async fn scan(&self) -> Result<ScanReport> {
        let now = self.clock.now();
        let homeworks = self
            .db
            .find::<Homework>(json!({ "isActive": true }))
            .await?;

        let mut report = ScanReport::default();
        for hw in homeworks {
            let Some(deadline) = hw.deadline else {
                continue;
            };
            let days = days_left(deadline, now);
            if !(1..=REMINDER_WINDOW_DAYS).contains(&days) {
                continue;
            }
            report.homeworks_due += 1;
            match self.remind(&hw, days).await {
                Ok((sent, deduplicated)) => {
                    report.reminders_sent += sent;
                    report.deduplicated += deduplicated;
                }
                Err(e) => {
                    report.failed_homeworks += 1;
                    warn!(homework_id = %hw.id, error = %e, "deadline reminders failed");
                }
            }
        }
        Ok(report)
    }

    async fn remind(&self, hw: &Homework, days: i64) -> Result<(usize, usize)> {
        let enrollments = self
            .db
            .find::<Enrollment>(json!({ "courseId": hw.course_id, "isCompleted": false }))
            .await?;
        let submitted: HashSet<Uuid> = self
            .db
            .find::<HomeworkSubmission>(json!({ "homeworkId": hw.id }))
            .await?
            .into_iter()
            .map(|s| s.student_id)
            .collect();

        let unit = if days == 1 { "day" } else { "days" };
        let message = format!("Homework \"{}\" is due in {days} {unit}", hw.title);
        let (mut sent, mut deduplicated) = (0, 0);
        for enrollment in enrollments
            .iter()
            .filter(|e| !submitted.contains(&e.student_id))
        {
            let student_id = enrollment.student_id;
            let outcome = self
                .notifications
                .dispatch(DispatchRequest {
                    user_id: student_id,
                    title: Some("Deadline reminder".to_string()),
                    message: message.clone(),
                    fingerprint: Fingerprint::Deadline {
                        homework_id: hw.id,
                        days_left: days,
                    },
                    settings: None,
                })
                .await;
            match outcome {
                Ok(DispatchOutcome::Dispatched { .. }) => sent += 1,
                Ok(DispatchOutcome::Deduplicated) => deduplicated += 1,
                Ok(DispatchOutcome::RecipientMissing) => {}
                // one student's failure does not stop the others
                Err(e) => warn!(homework_id = %hw.id, %student_id, error = %e, "deadline reminder failed"),
            }
        }
        debug!(homework_id = %hw.id, days, sent, deduplicated, "deadline reminders processed");
        Ok((sent, deduplicated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::homeworks::CreateHomeworkReq;
    use crate::testing::TestEnv;
    use chrono::Duration as Days;

    #[test]
    fn days_left_rounds_up() {
        let now = chrono::Utc::now();
        assert_eq!(days_left(now + Days::hours(1), now), 1);
        assert_eq!(days_left(now + Days::hours(24), now), 1);
        assert_eq!(days_left(now + Days::hours(25), now), 2);
        assert_eq!(days_left(now, now), 0);
        assert_eq!(days_left(now - Days::hours(3), now), 0);
    }

    async fn homework_due_in(env: &TestEnv, course_id: Uuid, hours: i64) -> Homework {
        env.homeworks
            .create(
                CreateHomeworkReq {
                    course_id: course_id.to_string(),
                    lesson_id: None,
                    title: format!("due in {hours}h"),
                    description: None,
                    deadline: Some(env.clock.now() + Days::hours(hours)),
                    is_active: None,
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reminds_only_students_who_have_not_submitted() {
        let env = TestEnv::new();
        let (course, _, _) = env.course_tree(1, 1).await;
        let pending = env.user("pending@example.com").await;
        let done = env.user("done@example.com").await;
        env.enroll(&pending, &course).await;
        env.enroll(&done, &course).await;

        let hw = homework_due_in(&env, course.id, 50).await;
        homework_due_in(&env, course.id, 24 * 10).await;
        env.homeworks
            .submit(&hw.id.to_string(), done.id, "finished".into())
            .await
            .unwrap();

        let scheduler = env.scheduler();
        let report = scheduler.scan().await.unwrap();
        assert_eq!(report.homeworks_due, 1);
        assert_eq!(report.reminders_sent, 1);

        let emailed: Vec<String> = env.email.sent().into_iter().map(|(to, _)| to).collect();
        assert_eq!(emailed, vec!["pending@example.com".to_string()]);
        assert!(env.email.sent()[0].1.contains("due in 3 days"));

        // same day count: suppressed by the dedup window
        let again = scheduler.scan().await.unwrap();
        assert_eq!(again.reminders_sent, 0);
        assert_eq!(again.deduplicated, 1);
    }

    #[tokio::test]
    async fn new_day_count_reminds_again() {
        let env = TestEnv::new();
        let (course, _, _) = env.course_tree(1, 1).await;
        let student = env.user("daily@example.com").await;
        env.enroll(&student, &course).await;
        homework_due_in(&env, course.id, 47).await;

        let scheduler = env.scheduler();
        assert_eq!(scheduler.scan().await.unwrap().reminders_sent, 1);
        env.clock.advance(Days::hours(24));
        assert_eq!(scheduler.scan().await.unwrap().reminders_sent, 1);
        env.clock.advance(Days::hours(24));
        // deadline passed
        assert_eq!(scheduler.scan().await.unwrap().homeworks_due, 0);
    }

    #[tokio::test]
    async fn completed_enrollments_are_skipped() {
        let env = TestEnv::new();
        let (course, _, _) = env.course_tree(1, 1).await;
        let student = env.user("graduate@example.com").await;
        let e = env.enroll(&student, &course).await;
        env.enrollments
            .complete_course(&e.id.to_string(), 90)
            .await
            .unwrap();
        homework_due_in(&env, course.id, 30).await;
        env.settle().await;
        let before = env.email.sent().len();

        let report = env.scheduler().scan().await.unwrap();
        assert_eq!(report.reminders_sent, 0);
        assert_eq!(env.email.sent().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let env = TestEnv::new();
        let scheduler = env.scheduler();
        let shutdown = scheduler.shutdown_handle();
        let handle = tokio::spawn(scheduler.run());
        tokio::task::yield_now().await;
        shutdown.notify_one();
        handle.await.unwrap();
    }
}
