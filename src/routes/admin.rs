use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use super::MANAGERS;
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Activity, Course, Enrollment, Notification, Paginated, PublicUser};
use crate::services::admin::PageQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(users))
        .route("/admin/courses", get(courses))
        .route("/admin/enrollments", get(enrollments))
        .route("/admin/notifications", get(notifications))
        .route("/admin/activity", get(activity))
}

async fn users(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paginated<PublicUser>>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.admin.users(&q).await?))
}

async fn courses(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paginated<Course>>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.admin.courses(&q).await?))
}

async fn enrollments(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paginated<Enrollment>>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.admin.enrollments(&q).await?))
}

async fn notifications(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paginated<Notification>>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.admin.notifications(&q).await?))
}

async fn activity(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<PageQuery>,
) -> Result<Json<Paginated<Activity>>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.admin.activity(&q).await?))
}
