use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};

use super::MANAGERS;
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{NotificationSettings, PublicUser, Role};
use crate::services::users::{AdminUpdateUserReq, NotificationSettingsReq, UpdateProfileReq};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me).put(update_me))
        .route("/users/me/notification-settings", put(update_settings))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
}

async fn me(State(st): State<AppState>, auth: AuthUser) -> Result<Json<PublicUser>> {
    Ok(Json(st.users.get(auth.id).await?.into()))
}

async fn update_me(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileReq>,
) -> Result<Json<PublicUser>> {
    Ok(Json(st.users.update_profile(auth.id, req).await?.into()))
}

async fn update_settings(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<NotificationSettingsReq>,
) -> Result<Json<NotificationSettings>> {
    Ok(Json(st.users.update_settings(auth.id, req).await?))
}

async fn get_user(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>> {
    let user = st.users.get_str(&id).await?;
    auth.require_self_or_staff(user.id)?;
    Ok(Json(user.into()))
}

async fn update_user(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateUserReq>,
) -> Result<Json<PublicUser>> {
    auth.require(MANAGERS)?;
    // only admins hand out the admin role
    if req.role == Some(Role::Admin) {
        auth.require(&[Role::Admin])?;
    }
    Ok(Json(st.users.admin_update(&id, req).await?.into()))
}

async fn delete_user(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(&[Role::Admin])?;
    st.users.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
