//! Enrollment state and the progress core: idempotent completion sets,
//! derived percentages, course completion and points.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::activity::ActivityLog;
use super::courses::{CourseLookup, CourseSummary};
use super::notifications::{DispatchRequest, Fingerprint, NotificationService};
use crate::clock::SharedClock;
use crate::db::{Db, StoreError};
use crate::error::{AppError, Result};
use crate::hub::{Hub, Topic};
use crate::models::{
    parse_id, parse_opt_id, ActivityKind, DetailedCourseProgress, Enrollment, StudentProgress,
    Stream, Tariff, User,
};

const UNKNOWN_COURSE: &str = "Unknown course";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnrollmentReq {
    pub student_id: String,
    pub course_id: String,
    pub stream_id: Option<String>,
    pub tariff_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

/// `done / total * 100`, two decimals, 0 for an empty course, never above 100.
pub fn percentage(done: usize, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = (done as f64 / total as f64 * 100.0).min(100.0);
    (pct * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct EnrollmentService {
    db: Db,
    courses: Arc<dyn CourseLookup>,
    notifications: NotificationService,
    activity: ActivityLog,
    hub: Hub,
    clock: SharedClock,
}

impl EnrollmentService {
    pub fn new(
        db: Db,
        courses: Arc<dyn CourseLookup>,
        notifications: NotificationService,
        activity: ActivityLog,
        hub: Hub,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            courses,
            notifications,
            activity,
            hub,
            clock,
        }
    }

    pub async fn create(&self, req: CreateEnrollmentReq) -> Result<Enrollment> {
        let student_id = parse_id("studentId", &req.student_id)?;
        let course_id = parse_id("courseId", &req.course_id)?;
        let stream_id = parse_opt_id("streamId", req.stream_id.as_deref())?;
        let tariff_id = parse_opt_id("tariffId", req.tariff_id.as_deref())?;

        let course = self
            .courses
            .summary(course_id)
            .await?
            .ok_or_else(|| AppError::not_found("course", course_id))?;
        if self.db.get::<User>(student_id).await?.is_none() {
            return Err(AppError::not_found("student", student_id));
        }
        if let Some(stream_id) = stream_id {
            let stream = self
                .db
                .get::<Stream>(stream_id)
                .await?
                .ok_or_else(|| AppError::not_found("stream", stream_id))?;
            if stream.course_id != course_id {
                return Err(AppError::validation("stream does not belong to the course"));
            }
        }
        if let Some(tariff_id) = tariff_id {
            if self.db.get::<Tariff>(tariff_id).await?.is_none() {
                return Err(AppError::not_found("tariff", tariff_id));
            }
        }

        let already = || AppError::AlreadyEnrolled {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
        };
        if self.find(student_id, course_id).await?.is_some() {
            return Err(already());
        }

        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id,
            course_id,
            stream_id,
            tariff_id,
            completed_modules: Vec::new(),
            completed_lessons: Vec::new(),
            is_completed: false,
            grade: None,
            deadline: req.deadline,
            points: 0,
            enrolled_at: self.clock.now(),
            completed_at: None,
        };
        match self.db.insert(&enrollment).await {
            Ok(()) => {}
            // lost a race with a concurrent enrollment for the same pair
            Err(StoreError::Duplicate { .. }) => return Err(already()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(%student_id, %course_id, enrollment_id = %enrollment.id, "student enrolled");
        self.activity
            .record(
                student_id,
                course_id,
                ActivityKind::Enrolled,
                format!("Enrolled in \"{}\"", course.title),
            )
            .await;
        Ok(enrollment)
    }

    async fn find(&self, student_id: Uuid, course_id: Uuid) -> Result<Option<Enrollment>> {
        Ok(self
            .db
            .find_one::<Enrollment>(json!({ "studentId": student_id, "courseId": course_id }))
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Enrollment> {
        let id = parse_id("id", id)?;
        self.db
            .get::<Enrollment>(id)
            .await?
            .ok_or_else(|| AppError::not_found("enrollment", id))
    }

    pub async fn list_for_student(&self, student_id: &str) -> Result<Vec<Enrollment>> {
        let student_id = parse_id("studentId", student_id)?;
        Ok(self
            .db
            .find::<Enrollment>(json!({ "studentId": student_id }))
            .await?)
    }

    pub async fn list_for_course(&self, course_id: &str) -> Result<Vec<Enrollment>> {
        let course_id = parse_id("courseId", course_id)?;
        Ok(self
            .db
            .find::<Enrollment>(json!({ "courseId": course_id }))
            .await?)
    }

    /// Whether the student holds an enrollment in the course, completed or not.
    pub async fn is_enrolled(&self, student_id: Uuid, course_id: Uuid) -> Result<bool> {
        Ok(self.find(student_id, course_id).await?.is_some())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id("id", id)?;
        if !self.db.delete::<Enrollment>(id).await? {
            return Err(AppError::not_found("enrollment", id));
        }
        tracing::info!(enrollment_id = %id, "enrollment deleted");
        Ok(())
    }

    /// Marks a lesson (and its module) complete for the student.
    ///
    /// Set-add is idempotent and atomic in the store, so repeated or racing
    /// calls converge. A notification is still requested on every call; the
    /// dedup window suppresses repeats.
    pub async fn update_student_progress(
        &self,
        student_id: &str,
        course_id: &str,
        module_id: &str,
        lesson_id: &str,
    ) -> Result<Enrollment> {
        let student_id = parse_id("studentId", student_id)?;
        let course_id = parse_id("courseId", course_id)?;
        let module_id = parse_id("moduleId", module_id)?;
        let lesson_id = parse_id("lessonId", lesson_id)?;

        let enrollment =
            self.find(student_id, course_id)
                .await?
                .ok_or_else(|| AppError::EnrollmentNotFound {
                    student_id: student_id.to_string(),
                    course_id: course_id.to_string(),
                })?;
        self.apply_progress(enrollment, module_id, lesson_id).await
    }

    /// Progress addressed by enrollment id, as the REST surface does it.
    pub async fn record_progress(
        &self,
        enrollment_id: &str,
        module_id: &str,
        lesson_id: &str,
    ) -> Result<Enrollment> {
        let enrollment = self.get(enrollment_id).await?;
        let module_id = parse_id("moduleId", module_id)?;
        let lesson_id = parse_id("lessonId", lesson_id)?;
        self.apply_progress(enrollment, module_id, lesson_id).await
    }

    async fn apply_progress(
        &self,
        enrollment: Enrollment,
        module_id: Uuid,
        lesson_id: Uuid,
    ) -> Result<Enrollment> {
        let path = self
            .courses
            .lesson_path(enrollment.course_id, module_id, lesson_id)
            .await?
            .ok_or_else(|| AppError::not_found("lesson", lesson_id))?;

        let updated = self
            .db
            .add_to_set::<Enrollment>(
                enrollment.id,
                &[
                    ("completedModules", json!([module_id])),
                    ("completedLessons", json!([lesson_id])),
                ],
            )
            .await?
            .ok_or_else(|| AppError::not_found("enrollment", enrollment.id))?;

        tracing::debug!(
            enrollment_id = %updated.id,
            %module_id,
            %lesson_id,
            lessons = updated.completed_lessons.len(),
            "progress recorded"
        );

        match self.detail(&updated).await {
            Ok(progress) => {
                self.hub.publish(
                    Topic::Progress(updated.student_id),
                    "progress-update",
                    &progress,
                );
            }
            Err(e) => tracing::warn!(enrollment_id = %updated.id, error = %e, "progress push skipped"),
        }

        let message = format!(
            "Lesson \"{}\" of module \"{}\" in \"{}\" completed",
            path.lesson_title, path.module_title, path.course_title
        );
        self.activity
            .record(
                updated.student_id,
                updated.course_id,
                ActivityKind::LessonCompleted,
                message.clone(),
            )
            .await;
        self.notifications.spawn_dispatch(DispatchRequest {
            user_id: updated.student_id,
            title: Some("Progress update".to_string()),
            message,
            fingerprint: Fingerprint::Progress {
                enrollment_id: updated.id,
                module_id,
                lesson_id,
            },
            settings: None,
        });
        Ok(updated)
    }

    pub async fn get_detailed_student_progress(&self, student_id: &str) -> Result<StudentProgress> {
        let student_id = parse_id("studentId", student_id)?;
        let enrollments = self
            .db
            .find::<Enrollment>(json!({ "studentId": student_id }))
            .await?;
        let mut progress = Vec::with_capacity(enrollments.len());
        for e in &enrollments {
            progress.push(self.detail(e).await?);
        }
        Ok(StudentProgress {
            student_id,
            progress,
        })
    }

    async fn detail(&self, e: &Enrollment) -> Result<DetailedCourseProgress> {
        let summary = self
            .courses
            .summary(e.course_id)
            .await?
            .unwrap_or_else(|| CourseSummary {
                course_id: e.course_id,
                title: UNKNOWN_COURSE.to_string(),
                total_modules: 0,
                total_lessons: 0,
            });
        Ok(DetailedCourseProgress {
            enrollment_id: e.id,
            course_id: e.course_id,
            course_title: summary.title,
            completed_modules: e.completed_modules.len(),
            total_modules: summary.total_modules,
            completion_percentage: percentage(e.completed_modules.len(), summary.total_modules),
            completed_lessons: e.completed_lessons.len(),
            total_lessons: summary.total_lessons,
            lesson_completion_percentage: percentage(
                e.completed_lessons.len(),
                summary.total_lessons,
            ),
            is_completed: e.is_completed,
            grade: e.grade,
            points: e.points,
            deadline: e.deadline,
        })
    }

    /// One-way transition to completed with a final grade in 0..=100.
    pub async fn complete_course(&self, enrollment_id: &str, grade: i64) -> Result<Enrollment> {
        let grade = u8::try_from(grade)
            .ok()
            .filter(|g| *g <= 100)
            .ok_or(AppError::InvalidGrade(grade))?;
        let enrollment = self.get(enrollment_id).await?;

        // at most one caller wins the transition; the rest get a Conflict
        let now = self.clock.now();
        let updated = self
            .db
            .set_fields_if::<Enrollment>(
                enrollment.id,
                json!({ "isCompleted": false }),
                json!({ "isCompleted": true, "grade": grade, "completedAt": now }),
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("enrollment {} is already completed", enrollment.id))
            })?;

        let title = match self.courses.summary(updated.course_id).await {
            Ok(Some(s)) => s.title,
            _ => UNKNOWN_COURSE.to_string(),
        };
        tracing::info!(enrollment_id = %updated.id, grade, "course completed");

        let message = format!("Course \"{title}\" completed with grade {grade}");
        self.activity
            .record(
                updated.student_id,
                updated.course_id,
                ActivityKind::CourseCompleted,
                message.clone(),
            )
            .await;
        self.notifications.spawn_dispatch(DispatchRequest {
            user_id: updated.student_id,
            title: Some("Course completed".to_string()),
            message,
            fingerprint: Fingerprint::CourseCompleted {
                enrollment_id: updated.id,
            },
            settings: None,
        });
        Ok(updated)
    }

    /// Adds points to the student's enrollment in the course. Points only
    /// grow; the increment is a single store update.
    pub async fn award_points(
        &self,
        student_id: Uuid,
        course_id: Uuid,
        points: u32,
    ) -> Result<Enrollment> {
        let enrollment =
            self.find(student_id, course_id)
                .await?
                .ok_or_else(|| AppError::EnrollmentNotFound {
                    student_id: student_id.to_string(),
                    course_id: course_id.to_string(),
                })?;
        if points == 0 {
            return Ok(enrollment);
        }
        let updated = self
            .db
            .increment::<Enrollment>(enrollment.id, "points", i64::from(points))
            .await?
            .ok_or_else(|| AppError::not_found("enrollment", enrollment.id))?;
        tracing::debug!(%student_id, %course_id, points, total = updated.points, "points awarded");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Notification;
    use crate::testing::TestEnv;
    use serde_json::Value;

    #[test]
    fn percentage_rounds_and_handles_empty_courses() {
        assert_eq!(percentage(1, 2), 50.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(5, 4), 100.0);
    }

    #[tokio::test]
    async fn half_the_modules_and_a_quarter_of_the_lessons() {
        let env = TestEnv::new();
        let student = env.user("s1@example.com").await;
        let (course, modules, lessons) = env.course_tree(2, 2).await;
        env.enroll(&student, &course).await;

        env.enrollments
            .update_student_progress(
                &student.id.to_string(),
                &course.id.to_string(),
                &modules[0].id.to_string(),
                &lessons[0].id.to_string(),
            )
            .await
            .unwrap();

        let report = env
            .enrollments
            .get_detailed_student_progress(&student.id.to_string())
            .await
            .unwrap();
        assert_eq!(report.progress.len(), 1);
        let p = &report.progress[0];
        assert_eq!(p.total_modules, 2);
        assert_eq!(p.total_lessons, 4);
        assert_eq!(p.completion_percentage, 50.0);
        assert_eq!(p.lesson_completion_percentage, 25.0);
    }

    #[tokio::test]
    async fn repeated_progress_is_idempotent() {
        let env = TestEnv::new();
        let student = env.user("s2@example.com").await;
        let (course, modules, lessons) = env.course_tree(1, 2).await;
        env.enroll(&student, &course).await;

        let args = (
            student.id.to_string(),
            course.id.to_string(),
            modules[0].id.to_string(),
            lessons[1].id.to_string(),
        );
        let once = env
            .enrollments
            .update_student_progress(&args.0, &args.1, &args.2, &args.3)
            .await
            .unwrap();
        let twice = env
            .enrollments
            .update_student_progress(&args.0, &args.1, &args.2, &args.3)
            .await
            .unwrap();
        assert_eq!(once.completed_modules, twice.completed_modules);
        assert_eq!(once.completed_lessons, twice.completed_lessons);
        assert_eq!(twice.completed_lessons, vec![lessons[1].id]);

        // second notification falls inside the dedup window
        env.settle().await;
        assert_eq!(
            env.db
                .count::<Notification>(json!({ "userId": student.id }))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn progress_requires_enrollment_and_valid_ids() {
        let env = TestEnv::new();
        let student = env.user("s3@example.com").await;
        let (course, modules, lessons) = env.course_tree(1, 1).await;

        let err = env
            .enrollments
            .update_student_progress(
                "bogus",
                &course.id.to_string(),
                &modules[0].id.to_string(),
                &lessons[0].id.to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier { field: "studentId", .. }));

        let err = env
            .enrollments
            .update_student_progress(
                &student.id.to_string(),
                &course.id.to_string(),
                &modules[0].id.to_string(),
                &lessons[0].id.to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EnrollmentNotFound { .. }));
    }

    #[tokio::test]
    async fn lesson_from_another_course_is_rejected() {
        let env = TestEnv::new();
        let student = env.user("s4@example.com").await;
        let (course, modules, _) = env.course_tree(1, 1).await;
        let (_, _, foreign) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;

        let err = env
            .enrollments
            .update_student_progress(
                &student.id.to_string(),
                &course.id.to_string(),
                &modules[0].id.to_string(),
                &foreign[0].id.to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "lesson", .. }));
    }

    #[tokio::test]
    async fn progress_is_pushed_to_the_student_topic() {
        let env = TestEnv::new();
        let student = env.user("s5@example.com").await;
        let (course, modules, lessons) = env.course_tree(1, 2).await;
        let enrollment = env.enroll(&student, &course).await;
        let mut rx = env.hub.subscribe(Topic::Progress(student.id));

        env.enrollments
            .record_progress(
                &enrollment.id.to_string(),
                &modules[0].id.to_string(),
                &lessons[0].id.to_string(),
            )
            .await
            .unwrap();

        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "progress-update");
        assert_eq!(frame["data"]["lessonCompletionPercentage"], 50.0);
    }

    #[tokio::test]
    async fn empty_course_reports_zero_percent() {
        let env = TestEnv::new();
        let student = env.user("s6@example.com").await;
        let (course, _, _) = env.course_tree(0, 0).await;
        env.enroll(&student, &course).await;

        let report = env
            .enrollments
            .get_detailed_student_progress(&student.id.to_string())
            .await
            .unwrap();
        assert_eq!(report.progress[0].completion_percentage, 0.0);
        assert_eq!(report.progress[0].lesson_completion_percentage, 0.0);
    }

    #[tokio::test]
    async fn grade_bounds() {
        let env = TestEnv::new();
        let (course, _, _) = env.course_tree(1, 1).await;

        for bad in [-1, 101] {
            let student = env.user(&format!("bad{bad}@example.com")).await;
            let e = env.enroll(&student, &course).await;
            let err = env
                .enrollments
                .complete_course(&e.id.to_string(), bad)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidGrade(g) if g == bad));
            assert!(!env.enrollments.get(&e.id.to_string()).await.unwrap().is_completed);
        }

        for good in [0, 100] {
            let student = env.user(&format!("good{good}@example.com")).await;
            let e = env.enroll(&student, &course).await;
            let done = env
                .enrollments
                .complete_course(&e.id.to_string(), good)
                .await
                .unwrap();
            assert!(done.is_completed);
            assert_eq!(done.grade, Some(good as u8));
            assert!(done.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn completion_is_one_way() {
        let env = TestEnv::new();
        let student = env.user("s7@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        let e = env.enroll(&student, &course).await;
        env.enrollments
            .complete_course(&e.id.to_string(), 80)
            .await
            .unwrap();
        let err = env
            .enrollments
            .complete_course(&e.id.to_string(), 90)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let stored = env.enrollments.get(&e.id.to_string()).await.unwrap();
        assert_eq!(stored.grade, Some(80));
    }

    #[tokio::test]
    async fn concurrent_completions_have_one_winner() {
        let env = TestEnv::new();
        let student = env.user("s7b@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        let e = env.enroll(&student, &course).await;
        let id = e.id.to_string();

        let (a, b) = tokio::join!(
            env.enrollments.complete_course(&id, 70),
            env.enrollments.complete_course(&id, 95),
        );
        let winner = match (a, b) {
            (Ok(done), Err(AppError::Conflict(_))) | (Err(AppError::Conflict(_)), Ok(done)) => done,
            other => panic!("expected exactly one completion, got {other:?}"),
        };
        let stored = env.enrollments.get(&id).await.unwrap();
        assert_eq!(stored.grade, winner.grade);
        assert_eq!(stored.completed_at, winner.completed_at);

        env.settle().await;
        let completions = env
            .db
            .count::<Notification>(json!({ "userId": student.id, "key": "course-completed" }))
            .await
            .unwrap();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn second_enrollment_for_same_pair_conflicts() {
        let env = TestEnv::new();
        let student = env.user("s8@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        let first = env.enroll(&student, &course).await;

        let err = env
            .enrollments
            .create(CreateEnrollmentReq {
                student_id: student.id.to_string(),
                course_id: course.id.to_string(),
                stream_id: None,
                tariff_id: None,
                deadline: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyEnrolled { .. }));

        let all = env
            .enrollments
            .list_for_student(&student.id.to_string())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].enrolled_at, first.enrolled_at);
    }

    #[tokio::test]
    async fn enrollment_requires_existing_course_and_student() {
        let env = TestEnv::new();
        let student = env.user("s9@example.com").await;
        let err = env
            .enrollments
            .create(CreateEnrollmentReq {
                student_id: student.id.to_string(),
                course_id: Uuid::new_v4().to_string(),
                stream_id: None,
                tariff_id: None,
                deadline: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { entity: "course", .. }));
    }

    #[tokio::test]
    async fn points_accumulate() {
        let env = TestEnv::new();
        let student = env.user("s10@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;

        env.enrollments.award_points(student.id, course.id, 5).await.unwrap();
        let e = env
            .enrollments
            .award_points(student.id, course.id, 7)
            .await
            .unwrap();
        assert_eq!(e.points, 12);

        let err = env
            .enrollments
            .award_points(Uuid::new_v4(), course.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EnrollmentNotFound { .. }));
    }
}
