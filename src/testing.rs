//! Shared fixtures for service and route tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::JwtKeys;
use crate::cache::MemoryCache;
use crate::channels::{ChannelError, ChannelKind, Channels, NotificationChannel, OutgoingMessage};
use crate::clock::ManualClock;
use crate::db::Db;
use crate::hub::Hub;
use crate::models::{Course, CourseModule, Enrollment, Lesson, NotificationSettings, Role, User};
use crate::scheduler::DeadlineScheduler;
use crate::services::courses::{CreateCourseReq, CreateLessonReq, CreateModuleReq};
use crate::services::enrollments::CreateEnrollmentReq;
use crate::services::users::NewUser;
use crate::state::{AppState, Deps};

pub const JWT_SECRET: &str = "test-secret";

/// Channel that records what it was asked to send.
pub struct RecordingChannel {
    kind: ChannelKind,
    fail_all: bool,
    failing_targets: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String)>>,
    attempts: AtomicUsize,
}

impl RecordingChannel {
    pub fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self::build(kind, false))
    }

    pub fn failing(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self::build(kind, true))
    }

    fn build(kind: ChannelKind, fail_all: bool) -> Self {
        Self {
            kind,
            fail_all,
            failing_targets: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn fail_for(&self, target: &str) {
        self.failing_targets.lock().unwrap().insert(target.to_string());
    }

    /// Successful sends as `(target, body)`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, target: &str, message: &OutgoingMessage) -> Result<(), ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing_targets.lock().unwrap().contains(target) {
            return Err(ChannelError::delivery(self.kind, "simulated outage"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), message.body.clone()));
        Ok(())
    }
}

pub fn sample_user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: "Test User".to_string(),
        password_hash: String::new(),
        role: Role::Student,
        phone: None,
        telegram_id: None,
        notification_settings: NotificationSettings::default(),
        created_at: Utc::now(),
    }
}

/// Full service graph over in-memory collaborators, an email and a
/// websocket recording channel, and a manual clock.
pub struct TestEnv {
    pub state: AppState,
    pub clock: ManualClock,
    pub email: Arc<RecordingChannel>,
    pub websocket: Arc<RecordingChannel>,
}

impl Deref for TestEnv {
    type Target = AppState;

    fn deref(&self) -> &AppState {
        &self.state
    }
}

impl TestEnv {
    pub fn new() -> Self {
        let clock = ManualClock::new(Utc::now());
        let email = RecordingChannel::new(ChannelKind::Email);
        let websocket = RecordingChannel::new(ChannelKind::Websocket);
        let state = AppState::new(Deps {
            db: Db::memory(),
            cache: Arc::new(MemoryCache::new(Arc::new(clock.clone()))),
            channels: Channels::new().with(email.clone()).with(websocket.clone()),
            hub: Hub::new(),
            clock: Arc::new(clock.clone()),
            jwt: JwtKeys::new(JWT_SECRET, Duration::from_secs(3600)),
            dedup_ttl: Duration::from_secs(3600),
        });
        Self {
            state,
            clock,
            email,
            websocket,
        }
    }

    async fn user_with_role(&self, email: &str, role: Role) -> User {
        self.users
            .create(NewUser {
                email: email.to_string(),
                name: email.split('@').next().unwrap_or("user").to_string(),
                password_hash: String::new(),
                role,
                phone: None,
                telegram_id: None,
            })
            .await
            .unwrap()
    }

    pub async fn user(&self, email: &str) -> User {
        self.user_with_role(email, Role::Student).await
    }

    pub async fn teacher(&self, email: &str) -> User {
        self.user_with_role(email, Role::Teacher).await
    }

    pub async fn admin_user(&self, email: &str) -> User {
        self.user_with_role(email, Role::Admin).await
    }

    pub fn token(&self, user: &User) -> String {
        self.jwt.issue(user.id, user.role, Utc::now()).unwrap()
    }

    /// A course with `modules` modules of `lessons_per_module` lessons each.
    /// Lessons are returned module by module.
    pub async fn course_tree(
        &self,
        modules: usize,
        lessons_per_module: usize,
    ) -> (Course, Vec<CourseModule>, Vec<Lesson>) {
        let course = self
            .courses
            .create_course(
                CreateCourseReq {
                    title: "Course".into(),
                    description: None,
                    teacher_id: None,
                    is_published: Some(true),
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        let mut all_modules = Vec::new();
        let mut all_lessons = Vec::new();
        for m in 0..modules {
            let module = self
                .courses
                .create_module(
                    &course.id.to_string(),
                    CreateModuleReq {
                        title: format!("Module {}", m + 1),
                        description: None,
                        position: None,
                    },
                )
                .await
                .unwrap();
            for l in 0..lessons_per_module {
                let lesson = self
                    .courses
                    .create_lesson(
                        &module.id.to_string(),
                        CreateLessonReq {
                            title: format!("Lesson {}.{}", m + 1, l + 1),
                            content: None,
                            position: None,
                        },
                    )
                    .await
                    .unwrap();
                all_lessons.push(lesson);
            }
            all_modules.push(module);
        }
        (course, all_modules, all_lessons)
    }

    pub async fn enroll(&self, student: &User, course: &Course) -> Enrollment {
        self.enrollments
            .create(CreateEnrollmentReq {
                student_id: student.id.to_string(),
                course_id: course.id.to_string(),
                stream_id: None,
                tariff_id: None,
                deadline: None,
            })
            .await
            .unwrap()
    }

    pub fn scheduler(&self) -> DeadlineScheduler {
        DeadlineScheduler::new(
            self.db.clone(),
            self.notifications.clone(),
            self.state.clock.clone(),
            Duration::from_secs(3600),
        )
    }

    /// Lets spawned background dispatches run to completion.
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}
