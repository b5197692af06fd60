//! Homework assignments, submissions and grading.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::activity::ActivityLog;
use super::enrollments::EnrollmentService;
use super::notifications::{DispatchRequest, Fingerprint, NotificationService};
use crate::clock::SharedClock;
use crate::db::{Db, StoreError};
use crate::error::{AppError, Result};
use crate::models::{
    parse_id, parse_opt_id, ActivityKind, Course, Homework, HomeworkSubmission, SubmissionStatus,
};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateHomeworkReq {
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHomeworkReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubmitHomeworkReq {
    pub content: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GradeHomeworkReq {
    pub grade: i64,
    pub feedback: Option<String>,
}

#[derive(Clone)]
pub struct HomeworkService {
    db: Db,
    enrollments: EnrollmentService,
    notifications: NotificationService,
    activity: ActivityLog,
    clock: SharedClock,
}

impl HomeworkService {
    pub fn new(
        db: Db,
        enrollments: EnrollmentService,
        notifications: NotificationService,
        activity: ActivityLog,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            enrollments,
            notifications,
            activity,
            clock,
        }
    }

    pub async fn create(&self, req: CreateHomeworkReq, created_by: Uuid) -> Result<Homework> {
        let course_id = parse_id("courseId", &req.course_id)?;
        let lesson_id = parse_opt_id("lessonId", req.lesson_id.as_deref())?;
        if req.title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        if self.db.get::<Course>(course_id).await?.is_none() {
            return Err(AppError::not_found("course", course_id));
        }
        let homework = Homework {
            id: Uuid::new_v4(),
            course_id,
            lesson_id,
            title: req.title.trim().to_string(),
            description: req.description,
            deadline: req.deadline,
            is_active: req.is_active.unwrap_or(true),
            created_by,
            created_at: self.clock.now(),
        };
        self.db.insert(&homework).await?;
        tracing::info!(homework_id = %homework.id, %course_id, "homework created");
        Ok(homework)
    }

    pub async fn list(&self, course_id: Option<&str>) -> Result<Vec<Homework>> {
        let filter = match parse_opt_id("courseId", course_id)? {
            Some(id) => json!({ "courseId": id }),
            None => json!({}),
        };
        Ok(self.db.find::<Homework>(filter).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Homework> {
        let id = parse_id("id", id)?;
        self.db
            .get::<Homework>(id)
            .await?
            .ok_or_else(|| AppError::not_found("homework", id))
    }

    pub async fn update(&self, id: &str, req: UpdateHomeworkReq) -> Result<Homework> {
        let mut hw = self.get(id).await?;
        if let Some(title) = req.title {
            if title.trim().is_empty() {
                return Err(AppError::validation("title is required"));
            }
            hw.title = title.trim().to_string();
        }
        if let Some(description) = req.description {
            hw.description = Some(description);
        }
        if let Some(deadline) = req.deadline {
            hw.deadline = Some(deadline);
        }
        if let Some(active) = req.is_active {
            hw.is_active = active;
        }
        self.db.save(&hw).await?;
        Ok(hw)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let hw = self.get(id).await?;
        let submissions = self
            .db
            .delete_where::<HomeworkSubmission>(json!({ "homeworkId": hw.id }))
            .await?;
        self.db.delete::<Homework>(hw.id).await?;
        tracing::info!(homework_id = %hw.id, submissions, "homework deleted");
        Ok(())
    }

    /// Late work is accepted and flagged. A resubmission replaces the
    /// content until the work has been graded.
    pub async fn submit(
        &self,
        homework_id: &str,
        student_id: Uuid,
        content: String,
    ) -> Result<HomeworkSubmission> {
        if content.trim().is_empty() {
            return Err(AppError::validation("content is required"));
        }
        let hw = self.get(homework_id).await?;
        if !hw.is_active {
            return Err(AppError::validation("homework is closed"));
        }
        if !self.enrollments.is_enrolled(student_id, hw.course_id).await? {
            return Err(AppError::EnrollmentNotFound {
                student_id: student_id.to_string(),
                course_id: hw.course_id.to_string(),
            });
        }

        let now = self.clock.now();
        let is_late = hw.deadline.is_some_and(|d| now > d);
        let existing = self
            .db
            .find_one::<HomeworkSubmission>(json!({ "homeworkId": hw.id, "studentId": student_id }))
            .await?;

        let submission = match existing {
            Some(s) if s.status == SubmissionStatus::Graded => {
                return Err(AppError::Conflict(
                    "homework has already been graded".to_string(),
                ))
            }
            Some(s) => self
                .db
                .set_fields_if::<HomeworkSubmission>(
                    s.id,
                    json!({ "status": SubmissionStatus::Submitted }),
                    json!({ "content": content, "isLate": is_late, "submittedAt": now }),
                )
                .await?
                .ok_or_else(|| AppError::Conflict("homework has already been graded".to_string()))?,
            None => {
                let s = HomeworkSubmission {
                    id: Uuid::new_v4(),
                    homework_id: hw.id,
                    course_id: hw.course_id,
                    student_id,
                    content,
                    is_late,
                    status: SubmissionStatus::Submitted,
                    grade: None,
                    feedback: None,
                    submitted_at: now,
                    graded_at: None,
                };
                match self.db.insert(&s).await {
                    Ok(()) => s,
                    Err(StoreError::Duplicate { .. }) => {
                        return Err(AppError::Conflict(
                            "submission already in progress".to_string(),
                        ))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tracing::info!(homework_id = %hw.id, %student_id, is_late, "homework submitted");
        self.activity
            .record(
                student_id,
                hw.course_id,
                ActivityKind::HomeworkSubmitted,
                format!("Homework \"{}\" submitted", hw.title),
            )
            .await;
        Ok(submission)
    }

    pub async fn get_submission(&self, id: &str) -> Result<HomeworkSubmission> {
        let id = parse_id("submissionId", id)?;
        self.db
            .get::<HomeworkSubmission>(id)
            .await?
            .ok_or_else(|| AppError::not_found("submission", id))
    }

    pub async fn list_submissions(&self, homework_id: &str) -> Result<Vec<HomeworkSubmission>> {
        let homework_id = parse_id("id", homework_id)?;
        Ok(self
            .db
            .find::<HomeworkSubmission>(json!({ "homeworkId": homework_id }))
            .await?)
    }

    pub async fn submissions_for_student(&self, student_id: Uuid) -> Result<Vec<HomeworkSubmission>> {
        Ok(self
            .db
            .find::<HomeworkSubmission>(json!({ "studentId": student_id }))
            .await?)
    }

    /// Grades once. The grade is also awarded as points.
    pub async fn grade(
        &self,
        submission_id: &str,
        grade: i64,
        feedback: Option<String>,
    ) -> Result<HomeworkSubmission> {
        let grade = u8::try_from(grade)
            .ok()
            .filter(|g| *g <= 100)
            .ok_or(AppError::InvalidGrade(grade))?;
        let submission = self.get_submission(submission_id).await?;

        // graded exactly once, so points are awarded exactly once
        let graded = self
            .db
            .set_fields_if::<HomeworkSubmission>(
                submission.id,
                json!({ "status": SubmissionStatus::Submitted }),
                json!({
                    "status": SubmissionStatus::Graded,
                    "grade": grade,
                    "feedback": feedback,
                    "gradedAt": self.clock.now(),
                }),
            )
            .await?
            .ok_or_else(|| AppError::Conflict("submission has already been graded".to_string()))?;

        if let Err(e) = self
            .enrollments
            .award_points(graded.student_id, graded.course_id, u32::from(grade))
            .await
        {
            tracing::warn!(submission_id = %graded.id, error = %e, "points not awarded for graded homework");
        }

        let title = match self.db.get::<Homework>(graded.homework_id).await {
            Ok(Some(hw)) => hw.title,
            _ => "homework".to_string(),
        };
        let message = format!("Your homework \"{title}\" was graded: {grade}/100");
        tracing::info!(submission_id = %graded.id, grade, "homework graded");
        self.activity
            .record(
                graded.student_id,
                graded.course_id,
                ActivityKind::HomeworkGraded,
                message.clone(),
            )
            .await;
        self.notifications.spawn_dispatch(DispatchRequest {
            user_id: graded.student_id,
            title: Some("Homework graded".to_string()),
            message,
            fingerprint: Fingerprint::HomeworkGraded {
                submission_id: graded.id,
            },
            settings: None,
        });
        Ok(graded)
    }
}
