use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::AUTHORS;
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Course, CourseModule, Lesson, Role};
use crate::services::courses::{
    CreateCourseReq, CreateLessonReq, CreateModuleReq, UpdateCourseReq, UpdateLessonReq,
    UpdateModuleReq,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/courses/:id/modules", get(list_modules).post(create_module))
        .route(
            "/modules/:id",
            get(get_module).put(update_module).delete(delete_module),
        )
        .route("/modules/:id/lessons", get(list_lessons).post(create_lesson))
        .route(
            "/lessons/:id",
            get(get_lesson).put(update_lesson).delete(delete_lesson),
        )
}

async fn list_courses(State(st): State<AppState>, auth: AuthUser) -> Result<Json<Vec<Course>>> {
    // students only see what has been published
    let published_only = auth.role == Role::Student;
    Ok(Json(st.courses.list_courses(published_only).await?))
}

async fn create_course(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateCourseReq>,
) -> Result<(StatusCode, Json<Course>)> {
    auth.require(AUTHORS)?;
    let course = st.courses.create_course(req, auth.id).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Course>> {
    Ok(Json(st.courses.get_course(&id).await?))
}

async fn update_course(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCourseReq>,
) -> Result<Json<Course>> {
    auth.require(AUTHORS)?;
    Ok(Json(st.courses.update_course(&id, req).await?))
}

async fn delete_course(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(AUTHORS)?;
    st.courses.delete_course(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_modules(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<CourseModule>>> {
    Ok(Json(st.courses.list_modules(&course_id).await?))
}

async fn create_module(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(course_id): Path<String>,
    Json(req): Json<CreateModuleReq>,
) -> Result<(StatusCode, Json<CourseModule>)> {
    auth.require(AUTHORS)?;
    let module = st.courses.create_module(&course_id, req).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

async fn get_module(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CourseModule>> {
    Ok(Json(st.courses.get_module(&id).await?))
}

async fn update_module(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateModuleReq>,
) -> Result<Json<CourseModule>> {
    auth.require(AUTHORS)?;
    Ok(Json(st.courses.update_module(&id, req).await?))
}

async fn delete_module(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(AUTHORS)?;
    st.courses.delete_module(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_lessons(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(module_id): Path<String>,
) -> Result<Json<Vec<Lesson>>> {
    Ok(Json(st.courses.list_lessons(&module_id).await?))
}

async fn create_lesson(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(module_id): Path<String>,
    Json(req): Json<CreateLessonReq>,
) -> Result<(StatusCode, Json<Lesson>)> {
    auth.require(AUTHORS)?;
    let lesson = st.courses.create_lesson(&module_id, req).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn get_lesson(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Lesson>> {
    Ok(Json(st.courses.get_lesson(&id).await?))
}

async fn update_lesson(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateLessonReq>,
) -> Result<Json<Lesson>> {
    auth.require(AUTHORS)?;
    Ok(Json(st.courses.update_lesson(&id, req).await?))
}

async fn delete_lesson(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(AUTHORS)?;
    st.courses.delete_lesson(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
