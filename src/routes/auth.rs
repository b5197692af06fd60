use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::auth::{ForgotPasswordReq, LoginReq, ResetPasswordReq, SignupReq, TokenResponse};
use crate::error::Result;
use crate::models::PublicUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

async fn signup(
    State(st): State<AppState>,
    Json(req): Json<SignupReq>,
) -> Result<(StatusCode, Json<PublicUser>)> {
    let user = st.auth.signup(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(State(st): State<AppState>, Json(req): Json<LoginReq>) -> Result<Json<TokenResponse>> {
    Ok(Json(st.auth.login(req).await?))
}

async fn forgot_password(
    State(st): State<AppState>,
    Json(req): Json<ForgotPasswordReq>,
) -> Result<Json<Value>> {
    st.auth.forgot_password(req).await?;
    Ok(Json(json!({
        "message": "If the email is registered, a reset code has been sent"
    })))
}

async fn reset_password(
    State(st): State<AppState>,
    Json(req): Json<ResetPasswordReq>,
) -> Result<StatusCode> {
    st.auth.reset_password(req).await?;
    Ok(StatusCode::NO_CONTENT)
}
