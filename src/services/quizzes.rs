//! Quizzes with optional time limits.
//!
//! A timed attempt starts by caching the start time under
//! `quiz-start:{quiz}:{student}` with TTL equal to the limit. Submission
//! fails once that entry is gone or the elapsed time exceeds the limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use super::activity::ActivityLog;
use super::enrollments::EnrollmentService;
use super::notifications::{DispatchRequest, Fingerprint, NotificationService};
use crate::cache::SharedCache;
use crate::clock::SharedClock;
use crate::db::{Db, StoreError};
use crate::error::{AppError, Result};
use crate::models::{parse_id, parse_opt_id, ActivityKind, Course, Quiz, QuizQuestion, QuizSubmission};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizReq {
    pub course_id: String,
    pub module_id: Option<String>,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub time_limit_minutes: Option<u32>,
    pub passing_score: Option<u8>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuizReq {
    pub title: Option<String>,
    pub questions: Option<Vec<QuizQuestion>>,
    pub time_limit_minutes: Option<u32>,
    pub passing_score: Option<u8>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubmitQuizReq {
    pub answers: Vec<usize>,
}

/// Question as shown to a student: no answer key.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub text: String,
    pub options: Vec<String>,
    pub points: u32,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub id: Uuid,
    pub course_id: Uuid,
    pub module_id: Option<Uuid>,
    pub title: String,
    pub questions: Vec<QuestionView>,
    pub time_limit_minutes: Option<u32>,
    pub passing_score: u8,
}

impl From<Quiz> for QuizView {
    fn from(q: Quiz) -> Self {
        Self {
            id: q.id,
            course_id: q.course_id,
            module_id: q.module_id,
            title: q.title,
            questions: q
                .questions
                .into_iter()
                .map(|qq| QuestionView {
                    text: qq.text,
                    options: qq.options,
                    points: qq.points,
                })
                .collect(),
            time_limit_minutes: q.time_limit_minutes,
            passing_score: q.passing_score,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub quiz_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn start_key(quiz_id: Uuid, student_id: Uuid) -> String {
    format!("quiz-start:{quiz_id}:{student_id}")
}

fn validate_questions(questions: &[QuizQuestion]) -> Result<()> {
    if questions.is_empty() {
        return Err(AppError::validation("a quiz needs at least one question"));
    }
    for (i, q) in questions.iter().enumerate() {
        if q.options.len() < 2 {
            return Err(AppError::validation(format!(
                "question {} needs at least two options",
                i + 1
            )));
        }
        if q.correct_option >= q.options.len() {
            return Err(AppError::validation(format!(
                "question {} has no option {}",
                i + 1,
                q.correct_option
            )));
        }
    }
    Ok(())
}

fn validate_limits(time_limit_minutes: Option<u32>, passing_score: u8) -> Result<()> {
    if time_limit_minutes == Some(0) {
        return Err(AppError::validation("timeLimitMinutes must be positive"));
    }
    if passing_score > 100 {
        return Err(AppError::validation("passingScore must be between 0 and 100"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct QuizService {
    db: Db,
    cache: SharedCache,
    enrollments: EnrollmentService,
    notifications: NotificationService,
    activity: ActivityLog,
    clock: SharedClock,
}

impl QuizService {
    pub fn new(
        db: Db,
        cache: SharedCache,
        enrollments: EnrollmentService,
        notifications: NotificationService,
        activity: ActivityLog,
        clock: SharedClock,
    ) -> Self {
        Self {
            db,
            cache,
            enrollments,
            notifications,
            activity,
            clock,
        }
    }

    pub async fn create(&self, req: CreateQuizReq) -> Result<Quiz> {
        let course_id = parse_id("courseId", &req.course_id)?;
        let module_id = parse_opt_id("moduleId", req.module_id.as_deref())?;
        if req.title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        validate_questions(&req.questions)?;
        let passing_score = req.passing_score.unwrap_or(50);
        validate_limits(req.time_limit_minutes, passing_score)?;
        if self.db.get::<Course>(course_id).await?.is_none() {
            return Err(AppError::not_found("course", course_id));
        }

        let quiz = Quiz {
            id: Uuid::new_v4(),
            course_id,
            module_id,
            title: req.title.trim().to_string(),
            questions: req.questions,
            time_limit_minutes: req.time_limit_minutes,
            passing_score,
            is_active: req.is_active.unwrap_or(true),
            created_at: self.clock.now(),
        };
        self.db.insert(&quiz).await?;
        tracing::info!(quiz_id = %quiz.id, %course_id, "quiz created");
        Ok(quiz)
    }

    pub async fn list(&self, course_id: Option<&str>) -> Result<Vec<Quiz>> {
        let filter = match parse_opt_id("courseId", course_id)? {
            Some(id) => json!({ "courseId": id }),
            None => json!({}),
        };
        Ok(self.db.find::<Quiz>(filter).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Quiz> {
        let id = parse_id("id", id)?;
        self.db
            .get::<Quiz>(id)
            .await?
            .ok_or_else(|| AppError::not_found("quiz", id))
    }

    pub async fn update(&self, id: &str, req: UpdateQuizReq) -> Result<Quiz> {
        let mut quiz = self.get(id).await?;
        if let Some(title) = req.title {
            if title.trim().is_empty() {
                return Err(AppError::validation("title is required"));
            }
            quiz.title = title.trim().to_string();
        }
        if let Some(questions) = req.questions {
            validate_questions(&questions)?;
            quiz.questions = questions;
        }
        if let Some(limit) = req.time_limit_minutes {
            quiz.time_limit_minutes = Some(limit);
        }
        if let Some(score) = req.passing_score {
            quiz.passing_score = score;
        }
        if let Some(active) = req.is_active {
            quiz.is_active = active;
        }
        validate_limits(quiz.time_limit_minutes, quiz.passing_score)?;
        self.db.save(&quiz).await?;
        Ok(quiz)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let quiz = self.get(id).await?;
        self.db
            .delete_where::<QuizSubmission>(json!({ "quizId": quiz.id }))
            .await?;
        self.db.delete::<Quiz>(quiz.id).await?;
        Ok(())
    }

    async fn open_for(&self, quiz_id: &str, student_id: Uuid) -> Result<Quiz> {
        let quiz = self.get(quiz_id).await?;
        if !quiz.is_active {
            return Err(AppError::validation("quiz is closed"));
        }
        if !self.enrollments.is_enrolled(student_id, quiz.course_id).await? {
            return Err(AppError::EnrollmentNotFound {
                student_id: student_id.to_string(),
                course_id: quiz.course_id.to_string(),
            });
        }
        let submitted = self
            .db
            .count::<QuizSubmission>(json!({ "quizId": quiz.id, "studentId": student_id }))
            .await?;
        if submitted > 0 {
            return Err(AppError::Conflict("quiz already submitted".to_string()));
        }
        Ok(quiz)
    }

    /// Starting again while an attempt is running keeps the first start time.
    pub async fn start(&self, quiz_id: &str, student_id: Uuid) -> Result<QuizAttempt> {
        let quiz = self.open_for(quiz_id, student_id).await?;
        let now = self.clock.now();
        let Some(limit) = quiz.time_limit_minutes else {
            return Ok(QuizAttempt {
                quiz_id: quiz.id,
                started_at: now,
                expires_at: None,
            });
        };
        let limit = chrono::Duration::minutes(i64::from(limit));
        let key = start_key(quiz.id, student_id);

        if let Some(started_at) = self.started_at(&key).await? {
            return Ok(QuizAttempt {
                quiz_id: quiz.id,
                started_at,
                expires_at: Some(started_at + limit),
            });
        }

        let ttl = Duration::from_secs(limit.num_seconds().unsigned_abs());
        self.cache.set_ex(&key, &now.to_rfc3339(), ttl).await?;
        tracing::debug!(quiz_id = %quiz.id, %student_id, "quiz attempt started");
        Ok(QuizAttempt {
            quiz_id: quiz.id,
            started_at: now,
            expires_at: Some(now + limit),
        })
    }

    async fn started_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| AppError::Internal(format!("corrupt quiz start entry {key}: {e}")))
    }

    pub async fn submit(
        &self,
        quiz_id: &str,
        student_id: Uuid,
        answers: Vec<usize>,
    ) -> Result<QuizSubmission> {
        let quiz = self.open_for(quiz_id, student_id).await?;
        if answers.len() != quiz.questions.len() {
            return Err(AppError::validation(format!(
                "expected {} answers, got {}",
                quiz.questions.len(),
                answers.len()
            )));
        }

        let now = self.clock.now();
        let key = start_key(quiz.id, student_id);
        if let Some(limit_minutes) = quiz.time_limit_minutes {
            let exceeded = || AppError::TimeLimitExceeded {
                quiz_id: quiz.id.to_string(),
                limit_minutes,
            };
            // an expired entry has already been evicted from the cache
            let started_at = self.started_at(&key).await?.ok_or_else(exceeded)?;
            if now - started_at > chrono::Duration::minutes(i64::from(limit_minutes)) {
                return Err(exceeded());
            }
        }

        let max_score: u32 = quiz.questions.iter().map(|q| q.points).sum();
        let score: u32 = quiz
            .questions
            .iter()
            .zip(&answers)
            .filter(|(q, a)| q.correct_option == **a)
            .map(|(q, _)| q.points)
            .sum();
        let percentage = if max_score == 0 {
            0.0
        } else {
            (f64::from(score) / f64::from(max_score) * 10000.0).round() / 100.0
        };
        let submission = QuizSubmission {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            course_id: quiz.course_id,
            student_id,
            answers,
            score,
            max_score,
            percentage,
            passed: percentage >= f64::from(quiz.passing_score),
            submitted_at: now,
        };
        match self.db.insert(&submission).await {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(AppError::Conflict("quiz already submitted".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        if quiz.time_limit_minutes.is_some() {
            if let Err(e) = self.cache.delete(&key).await {
                tracing::warn!(key, error = %e, "failed to clear quiz start entry");
            }
        }
        if let Err(e) = self
            .enrollments
            .award_points(student_id, quiz.course_id, score)
            .await
        {
            tracing::warn!(quiz_id = %quiz.id, %student_id, error = %e, "points not awarded for quiz");
        }

        tracing::info!(quiz_id = %quiz.id, %student_id, score, max_score, "quiz submitted");
        let message = format!(
            "Quiz \"{}\" submitted: {}/{} ({}%)",
            quiz.title, score, max_score, percentage
        );
        self.activity
            .record(
                student_id,
                quiz.course_id,
                ActivityKind::QuizSubmitted,
                message.clone(),
            )
            .await;
        self.notifications.spawn_dispatch(DispatchRequest {
            user_id: student_id,
            title: Some("Quiz result".to_string()),
            message,
            fingerprint: Fingerprint::QuizSubmitted {
                submission_id: submission.id,
            },
            settings: None,
        });
        Ok(submission)
    }

    pub async fn submissions(&self, quiz_id: &str) -> Result<Vec<QuizSubmission>> {
        let quiz_id = parse_id("id", quiz_id)?;
        Ok(self
            .db
            .find::<QuizSubmission>(json!({ "quizId": quiz_id }))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Enrollment;
    use crate::testing::TestEnv;

    fn questions() -> Vec<QuizQuestion> {
        vec![
            QuizQuestion {
                text: "2+2".into(),
                options: vec!["3".into(), "4".into()],
                correct_option: 1,
                points: 2,
            },
            QuizQuestion {
                text: "capital of France".into(),
                options: vec!["Paris".into(), "Rome".into()],
                correct_option: 0,
                points: 1,
            },
        ]
    }

    async fn timed_quiz(env: &TestEnv, course_id: Uuid, minutes: Option<u32>) -> Quiz {
        env.quizzes
            .create(CreateQuizReq {
                course_id: course_id.to_string(),
                module_id: None,
                title: "Warmup".into(),
                questions: questions(),
                time_limit_minutes: minutes,
                passing_score: Some(60),
                is_active: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn late_submission_exceeds_time_limit() {
        let env = TestEnv::new();
        let student = env.user("q1@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, Some(10)).await;
        let id = quiz.id.to_string();

        env.quizzes.start(&id, student.id).await.unwrap();
        env.clock.advance(chrono::Duration::minutes(11));
        let err = env.quizzes.submit(&id, student.id, vec![1, 0]).await.unwrap_err();
        assert!(matches!(err, AppError::TimeLimitExceeded { limit_minutes: 10, .. }));
        assert!(env.quizzes.submissions(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_within_limit_scores_and_clears_start() {
        let env = TestEnv::new();
        let student = env.user("q2@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, Some(10)).await;
        let id = quiz.id.to_string();

        env.quizzes.start(&id, student.id).await.unwrap();
        env.clock.advance(chrono::Duration::minutes(9));
        let sub = env.quizzes.submit(&id, student.id, vec![1, 1]).await.unwrap();
        assert_eq!(sub.score, 2);
        assert_eq!(sub.max_score, 3);
        assert_eq!(sub.percentage, 66.67);
        assert!(sub.passed);

        let key = start_key(quiz.id, student.id);
        assert!(env.cache.get(&key).await.unwrap().is_none());

        let e = env
            .db
            .find_one::<Enrollment>(json!({ "studentId": student.id }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.points, 2);

        let again = env.quizzes.submit(&id, student.id, vec![1, 0]).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn one_submission_per_student_even_when_racing() {
        let env = TestEnv::new();
        let student = env.user("q2b@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, None).await;
        let id = quiz.id.to_string();

        let (a, b) = tokio::join!(
            env.quizzes.submit(&id, student.id, vec![1, 0]),
            env.quizzes.submit(&id, student.id, vec![1, 0]),
        );
        let winner = match (a, b) {
            (Ok(s), Err(AppError::Conflict(_))) | (Err(AppError::Conflict(_)), Ok(s)) => s,
            other => panic!("expected exactly one submission, got {other:?}"),
        };
        assert_eq!(env.quizzes.submissions(&id).await.unwrap().len(), 1);
        let e = env
            .db
            .find_one::<Enrollment>(json!({ "studentId": student.id }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.points, u64::from(winner.score));

        // the store itself refuses a second row for the same pair
        let dup = QuizSubmission {
            id: Uuid::new_v4(),
            ..winner
        };
        let err = env.db.insert(&dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn restarting_keeps_the_first_start_time() {
        let env = TestEnv::new();
        let student = env.user("q3@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, Some(10)).await;
        let id = quiz.id.to_string();

        let first = env.quizzes.start(&id, student.id).await.unwrap();
        env.clock.advance(chrono::Duration::minutes(5));
        let second = env.quizzes.start(&id, student.id).await.unwrap();
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn timed_quiz_needs_a_start() {
        let env = TestEnv::new();
        let student = env.user("q4@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, Some(10)).await;

        let err = env
            .quizzes
            .submit(&quiz.id.to_string(), student.id, vec![1, 0])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TimeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn untimed_quiz_skips_the_clock() {
        let env = TestEnv::new();
        let student = env.user("q5@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, None).await;

        env.clock.advance(chrono::Duration::days(3));
        let sub = env
            .quizzes
            .submit(&quiz.id.to_string(), student.id, vec![0, 0])
            .await
            .unwrap();
        assert_eq!(sub.score, 1);
        assert!(!sub.passed);
    }

    #[tokio::test]
    async fn wrong_answer_count_is_rejected() {
        let env = TestEnv::new();
        let student = env.user("q6@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let quiz = timed_quiz(&env, course.id, None).await;
        let err = env
            .quizzes
            .submit(&quiz.id.to_string(), student.id, vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn student_view_hides_the_answer_key() {
        let quiz = Quiz {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            module_id: None,
            title: "t".into(),
            questions: questions(),
            time_limit_minutes: None,
            passing_score: 50,
            is_active: true,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(QuizView::from(quiz)).unwrap();
        assert!(v["questions"][0].get("correctOption").is_none());
    }
}
