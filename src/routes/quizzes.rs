use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{AUTHORS, GRADERS};
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Quiz, QuizSubmission, Role};
use crate::services::quizzes::{CreateQuizReq, QuizAttempt, QuizView, SubmitQuizReq, UpdateQuizReq};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quizzes", get(list).post(create))
        .route("/quizzes/:id", get(get_one).put(update).delete(remove))
        .route("/quizzes/:id/start", post(start))
        .route("/quizzes/:id/submit", post(submit))
        .route("/quizzes/:id/submissions", get(submissions))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    course_id: Option<String>,
}

/// Students get the quiz without its answer key.
fn for_role(auth: &AuthUser, quiz: Quiz) -> Response {
    if auth.role == Role::Student {
        Json(QuizView::from(quiz)).into_response()
    } else {
        Json(quiz).into_response()
    }
}

async fn list(
    State(st): State<AppState>,
    auth: AuthUser,
    Query(q): Query<ListQuery>,
) -> Result<Response> {
    let quizzes = st.quizzes.list(q.course_id.as_deref()).await?;
    if auth.role == Role::Student {
        let views: Vec<QuizView> = quizzes
            .into_iter()
            .filter(|q| q.is_active)
            .map(QuizView::from)
            .collect();
        return Ok(Json(views).into_response());
    }
    Ok(Json(quizzes).into_response())
}

async fn create(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateQuizReq>,
) -> Result<(StatusCode, Json<Quiz>)> {
    auth.require(AUTHORS)?;
    let quiz = st.quizzes.create(req).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

async fn get_one(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Response> {
    let quiz = st.quizzes.get(&id).await?;
    Ok(for_role(&auth, quiz))
}

async fn update(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuizReq>,
) -> Result<Json<Quiz>> {
    auth.require(AUTHORS)?;
    Ok(Json(st.quizzes.update(&id, req).await?))
}

async fn remove(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(AUTHORS)?;
    st.quizzes.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<QuizAttempt>> {
    auth.require(&[Role::Student])?;
    Ok(Json(st.quizzes.start(&id, auth.id).await?))
}

async fn submit(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<SubmitQuizReq>,
) -> Result<Json<QuizSubmission>> {
    auth.require(&[Role::Student])?;
    Ok(Json(st.quizzes.submit(&id, auth.id, req.answers).await?))
}

async fn submissions(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<QuizSubmission>>> {
    auth.require(GRADERS)?;
    Ok(Json(st.quizzes.submissions(&id).await?))
}
