//! HTTP surface. Every handler authenticates through `AuthUser` and checks
//! roles before calling into the services.

mod admin;
mod auth;
mod courses;
mod enrollments;
mod homeworks;
mod notifications;
mod quizzes;
mod resources;
mod users;
mod ws;

use axum::routing::get;
use axum::Router;

use crate::models::Role;
use crate::state::AppState;

/// Roles that author course content.
const AUTHORS: &[Role] = &[Role::Teacher, Role::Admin, Role::Manager];
/// Roles that review and grade student work.
const GRADERS: &[Role] = &[Role::Teacher, Role::Admin, Role::Manager, Role::Assistant];
const MANAGERS: &[Role] = &[Role::Admin, Role::Manager];

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(auth::router())
        .merge(users::router())
        .merge(courses::router())
        .merge(enrollments::router())
        .merge(notifications::router())
        .merge(homeworks::router())
        .merge(quizzes::router())
        .merge(resources::router())
        .merge(admin::router())
        .merge(ws::router())
        .with_state(state)
}
