use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthService, JwtKeys};
use crate::cache::SharedCache;
use crate::channels::Channels;
use crate::clock::SharedClock;
use crate::db::Db;
use crate::hub::Hub;
use crate::services::activity::ActivityLog;
use crate::services::admin::AdminService;
use crate::services::courses::CourseService;
use crate::services::enrollments::EnrollmentService;
use crate::services::homeworks::HomeworkService;
use crate::services::notifications::NotificationService;
use crate::services::quizzes::QuizService;
use crate::services::resources::ResourceService;
use crate::services::users::UserService;

/// Collaborators the services are wired from.
pub struct Deps {
    pub db: Db,
    pub cache: SharedCache,
    pub channels: Channels,
    pub hub: Hub,
    pub clock: SharedClock,
    pub jwt: JwtKeys,
    pub dedup_ttl: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: SharedCache,
    pub hub: Hub,
    pub clock: SharedClock,
    pub jwt: JwtKeys,
    pub auth: AuthService,
    pub users: UserService,
    pub courses: CourseService,
    pub enrollments: EnrollmentService,
    pub notifications: NotificationService,
    pub homeworks: HomeworkService,
    pub quizzes: QuizService,
    pub resources: ResourceService,
    pub admin: AdminService,
    pub activity: ActivityLog,
}

impl AppState {
    pub fn new(deps: Deps) -> Self {
        let Deps {
            db,
            cache,
            channels,
            hub,
            clock,
            jwt,
            dedup_ttl,
        } = deps;

        let users = UserService::new(db.clone(), clock.clone());
        let courses = CourseService::new(db.clone(), clock.clone());
        let activity = ActivityLog::new(db.clone(), hub.clone(), clock.clone());
        let notifications = NotificationService::new(
            db.clone(),
            cache.clone(),
            channels.clone(),
            clock.clone(),
            dedup_ttl,
        );
        let enrollments = EnrollmentService::new(
            db.clone(),
            Arc::new(courses.clone()),
            notifications.clone(),
            activity.clone(),
            hub.clone(),
            clock.clone(),
        );
        let homeworks = HomeworkService::new(
            db.clone(),
            enrollments.clone(),
            notifications.clone(),
            activity.clone(),
            clock.clone(),
        );
        let quizzes = QuizService::new(
            db.clone(),
            cache.clone(),
            enrollments.clone(),
            notifications.clone(),
            activity.clone(),
            clock.clone(),
        );
        let auth = AuthService::new(
            users.clone(),
            cache.clone(),
            channels,
            jwt.clone(),
            clock.clone(),
        );

        Self {
            resources: ResourceService::new(db.clone(), clock.clone()),
            admin: AdminService::new(db.clone()),
            db,
            cache,
            hub,
            clock,
            jwt,
            auth,
            users,
            courses,
            enrollments,
            notifications,
            homeworks,
            quizzes,
            activity,
        }
    }
}
