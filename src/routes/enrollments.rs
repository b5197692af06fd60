use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use super::{GRADERS, MANAGERS};
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{parse_id, Enrollment, Role, StudentProgress};
use crate::services::enrollments::CreateEnrollmentReq;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enrollments", post(create))
        .route("/enrollments/:id", get(get_one).delete(delete))
        .route("/enrollments/:id/progress", put(progress))
        .route("/enrollments/:id/complete", put(complete))
        .route("/students/:id/enrollments", get(for_student))
        .route("/students/:id/progress", get(student_progress))
        .route("/courses/:id/enrollments", get(for_course))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressReq {
    module_id: String,
    lesson_id: String,
}

#[derive(Deserialize)]
struct CompleteReq {
    grade: i64,
}

async fn create(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateEnrollmentReq>,
) -> Result<(StatusCode, Json<Enrollment>)> {
    // students enroll themselves; managers enroll anyone
    if auth.role == Role::Student {
        auth.require_self_or_staff(parse_id("studentId", &req.student_id)?)?;
    } else {
        auth.require(MANAGERS)?;
    }
    let enrollment = st.enrollments.create(req).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

async fn get_one(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Enrollment>> {
    let enrollment = st.enrollments.get(&id).await?;
    auth.require_self_or_staff(enrollment.student_id)?;
    Ok(Json(enrollment))
}

async fn delete(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;
    st.enrollments.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn progress(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ProgressReq>,
) -> Result<Json<Enrollment>> {
    let enrollment = st.enrollments.get(&id).await?;
    if auth.role == Role::Student {
        auth.require_self_or_staff(enrollment.student_id)?;
    } else {
        auth.require(GRADERS)?;
    }
    let updated = st
        .enrollments
        .record_progress(&id, &req.module_id, &req.lesson_id)
        .await?;
    Ok(Json(updated))
}

async fn complete(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<CompleteReq>,
) -> Result<Json<Enrollment>> {
    auth.require(GRADERS)?;
    Ok(Json(st.enrollments.complete_course(&id, req.grade).await?))
}

async fn for_student(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<Enrollment>>> {
    auth.require_self_or_staff(parse_id("studentId", &student_id)?)?;
    Ok(Json(st.enrollments.list_for_student(&student_id).await?))
}

async fn student_progress(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(student_id): Path<String>,
) -> Result<Json<StudentProgress>> {
    auth.require_self_or_staff(parse_id("studentId", &student_id)?)?;
    Ok(Json(
        st.enrollments
            .get_detailed_student_progress(&student_id)
            .await?,
    ))
}

async fn for_course(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Enrollment>>> {
    if auth.role == Role::Student {
        return Err(AppError::Forbidden);
    }
    Ok(Json(st.enrollments.list_for_course(&course_id).await?))
}
