use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use super::{AUTHORS, GRADERS};
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Homework, HomeworkSubmission, Role};
use crate::services::homeworks::{
    CreateHomeworkReq, GradeHomeworkReq, SubmitHomeworkReq, UpdateHomeworkReq,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/homeworks", get(list).post(create))
        .route("/homeworks/:id", get(get_one).put(update).delete(remove))
        .route("/homeworks/:id/submit", post(submit))
        .route("/homeworks/:id/submissions", get(submissions))
        .route("/submissions/me", get(my_submissions))
        .route("/submissions/:id/grade", put(grade))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    course_id: Option<String>,
}

async fn list(
    State(st): State<AppState>,
    _auth: AuthUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<Homework>>> {
    Ok(Json(st.homeworks.list(q.course_id.as_deref()).await?))
}

async fn create(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateHomeworkReq>,
) -> Result<(StatusCode, Json<Homework>)> {
    auth.require(AUTHORS)?;
    let hw = st.homeworks.create(req, auth.id).await?;
    Ok((StatusCode::CREATED, Json(hw)))
}

async fn get_one(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Homework>> {
    Ok(Json(st.homeworks.get(&id).await?))
}

async fn update(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateHomeworkReq>,
) -> Result<Json<Homework>> {
    auth.require(AUTHORS)?;
    Ok(Json(st.homeworks.update(&id, req).await?))
}

async fn remove(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(AUTHORS)?;
    st.homeworks.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SubmitHomeworkReq>,
) -> Result<Json<HomeworkSubmission>> {
    auth.require(&[Role::Student])?;
    Ok(Json(st.homeworks.submit(&id, auth.id, req.content).await?))
}

async fn submissions(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<HomeworkSubmission>>> {
    auth.require(GRADERS)?;
    Ok(Json(st.homeworks.list_submissions(&id).await?))
}

async fn my_submissions(
    State(st): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<HomeworkSubmission>>> {
    Ok(Json(st.homeworks.submissions_for_student(auth.id).await?))
}

async fn grade(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<GradeHomeworkReq>,
) -> Result<Json<HomeworkSubmission>> {
    auth.require(GRADERS)?;
    Ok(Json(st.homeworks.grade(&id, req.grade, req.feedback).await?))
}
