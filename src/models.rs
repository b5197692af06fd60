use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::db::Document;
use crate::error::AppError;

/// Parses a client-supplied identifier, naming the offending field on failure.
pub fn parse_id(field: &'static str, value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value.trim()).map_err(|_| AppError::InvalidIdentifier {
        field,
        value: value.to_string(),
    })
}

pub fn parse_opt_id(field: &'static str, value: Option<&str>) -> Result<Option<Uuid>, AppError> {
    value.map(|v| parse_id(field, v)).transpose()
}

// ---------- users ----------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
    Manager,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Assistant => "assistant",
        }
    }
}

/// Per-channel opt-in flags.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub email: bool,
    pub telegram: bool,
    pub sms: bool,
    pub websocket: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            email: true,
            telegram: true,
            sms: false,
            websocket: true,
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub telegram_id: Option<String>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
    pub created_at: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: &'static str = "users";
    const UNIQUE: &'static [&'static str] = &["email"];

    fn id(&self) -> Uuid {
        self.id
    }
}

/// User as returned over the API (no password hash).
#[skip_serializing_none]
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub telegram_id: Option<String>,
    pub notification_settings: NotificationSettings,
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            role: u.role,
            phone: u.phone,
            telegram_id: u.telegram_id,
            notification_settings: u.notification_settings,
            created_at: u.created_at,
        }
    }
}

// ---------- courses ----------

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub teacher_id: Option<Uuid>,
    #[serde(default)]
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for Course {
    const COLLECTION: &'static str = "courses";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseModule {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

impl Document for CourseModule {
    const COLLECTION: &'static str = "modules";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub content: Option<String>,
    #[serde(default)]
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

impl Document for Lesson {
    const COLLECTION: &'static str = "lessons";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ---------- enrollments ----------

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub stream_id: Option<Uuid>,
    pub tariff_id: Option<Uuid>,
    #[serde(default)]
    pub completed_modules: Vec<Uuid>,
    #[serde(default)]
    pub completed_lessons: Vec<Uuid>,
    #[serde(default)]
    pub is_completed: bool,
    /// Set only when the course is completed, 0..=100
    pub grade: Option<u8>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub points: u64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document for Enrollment {
    const COLLECTION: &'static str = "enrollments";
    const UNIQUE: &'static [&'static str] = &["studentId", "courseId"];

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailedCourseProgress {
    pub enrollment_id: Uuid,
    pub course_id: Uuid,
    pub course_title: String,
    pub completed_modules: usize,
    pub total_modules: u64,
    pub completion_percentage: f64,
    pub completed_lessons: usize,
    pub total_lessons: u64,
    pub lesson_completion_percentage: f64,
    pub is_completed: bool,
    pub grade: Option<u8>,
    pub points: u64,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: Uuid,
    pub progress: Vec<DetailedCourseProgress>,
}

// ---------- notifications ----------

/// Exactly one addressing mode per notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    Single {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    Bulk {
        recipients: Vec<Uuid>,
    },
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: Option<String>,
    pub message: String,
    /// Template identity used for dedup
    pub key: Option<String>,
    #[serde(flatten)]
    pub audience: Audience,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Document for Notification {
    const COLLECTION: &'static str = "notifications";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Notification {
    pub fn is_addressed_to(&self, user_id: Uuid) -> bool {
        match &self.audience {
            Audience::Single { user_id: u } => *u == user_id,
            Audience::Bulk { recipients } => recipients.contains(&user_id),
        }
    }
}

// ---------- homeworks ----------

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Homework {
    pub id: Uuid,
    pub course_id: Uuid,
    pub lesson_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default = "active")]
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

fn active() -> bool {
    true
}

impl Document for Homework {
    const COLLECTION: &'static str = "homeworks";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Graded,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkSubmission {
    pub id: Uuid,
    pub homework_id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub is_late: bool,
    pub status: SubmissionStatus,
    pub grade: Option<u8>,
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl Document for HomeworkSubmission {
    const COLLECTION: &'static str = "submissions";
    const UNIQUE: &'static [&'static str] = &["homeworkId", "studentId"];

    fn id(&self) -> Uuid {
        self.id
    }
}

// ---------- quizzes ----------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    #[serde(default = "one_point")]
    pub points: u32,
}

fn one_point() -> u32 {
    1
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: Uuid,
    pub course_id: Uuid,
    pub module_id: Option<Uuid>,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    /// No limit when absent
    pub time_limit_minutes: Option<u32>,
    /// Minimum percentage to pass
    pub passing_score: u8,
    #[serde(default = "active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for Quiz {
    const COLLECTION: &'static str = "quizzes";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub answers: Vec<usize>,
    pub score: u32,
    pub max_score: u32,
    pub percentage: f64,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

impl Document for QuizSubmission {
    const COLLECTION: &'static str = "quiz-submissions";
    const UNIQUE: &'static [&'static str] = &["quizId", "studentId"];

    fn id(&self) -> Uuid {
        self.id
    }
}

// ---------- groups, streams, tariffs ----------

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub course_id: Option<Uuid>,
    pub teacher_id: Option<Uuid>,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Document for Group {
    const COLLECTION: &'static str = "groups";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Document for Stream {
    const COLLECTION: &'static str = "streams";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tariff {
    pub id: Uuid,
    pub name: String,
    /// Minor currency units
    pub price: u64,
    pub currency: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub duration_days: Option<u32>,
    #[serde(default = "active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Document for Tariff {
    const COLLECTION: &'static str = "tariffs";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ---------- activity ----------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Enrolled,
    LessonCompleted,
    CourseCompleted,
    QuizSubmitted,
    HomeworkSubmitted,
    HomeworkGraded,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub kind: ActivityKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Document for Activity {
    const COLLECTION: &'static str = "activities";

    fn id(&self) -> Uuid {
        self.id
    }
}

// ---------- listing ----------

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        Self {
            data,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notification_audience_is_flattened() {
        let user = Uuid::new_v4();
        let n = Notification {
            id: Uuid::new_v4(),
            title: None,
            message: "hi".into(),
            key: None,
            audience: Audience::Single { user_id: user },
            is_read: false,
            is_sent: false,
            sent_at: None,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["userId"], json!(user));
        assert!(v.get("recipients").is_none());
        assert!(v.get("title").is_none());

        let back: Notification = serde_json::from_value(v).unwrap();
        assert_eq!(back.audience, Audience::Single { user_id: user });

        let bulk: Notification = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "message": "all",
            "recipients": [user],
            "createdAt": Utc::now(),
        }))
        .unwrap();
        assert!(bulk.is_addressed_to(user));
        assert!(!bulk.is_sent);
    }

    #[test]
    fn parse_id_names_the_field() {
        match parse_id("studentId", "nope") {
            Err(AppError::InvalidIdentifier { field, .. }) => assert_eq!(field, "studentId"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn total_pages_rounds_up() {
        let p = Paginated::new(vec![1, 2], 21, 1, 10);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Paginated::<u8>::new(vec![], 0, 1, 10).total_pages, 0);
    }
}
