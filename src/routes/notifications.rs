use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::AUTHORS;
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Notification, Role};
use crate::services::notifications::{BulkDispatch, BulkNotificationReq};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", put(read_all))
        .route("/notifications/bulk", post(bulk))
        .route("/notifications/:id/read", put(read))
        .route("/notifications/:id", delete(remove))
}

async fn list(State(st): State<AppState>, auth: AuthUser) -> Result<Json<Vec<Notification>>> {
    Ok(Json(st.notifications.list_for_user(auth.id).await?))
}

async fn unread_count(State(st): State<AppState>, auth: AuthUser) -> Result<Json<Value>> {
    let count = st.notifications.unread_count(auth.id).await?;
    Ok(Json(json!({ "count": count })))
}

async fn read(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>> {
    Ok(Json(st.notifications.mark_as_read(&id, auth.id).await?))
}

async fn read_all(State(st): State<AppState>, auth: AuthUser) -> Result<Json<Value>> {
    let marked = st.notifications.mark_all_as_read(auth.id).await?;
    Ok(Json(json!({ "marked": marked })))
}

async fn remove(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if auth.role == Role::Admin {
        st.notifications.delete_any(&id).await?;
    } else {
        st.notifications.delete(&id, auth.id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<BulkNotificationReq>,
) -> Result<(StatusCode, Json<BulkDispatch>)> {
    auth.require(AUTHORS)?;
    let out = st.notifications.create_bulk(req).await?;
    Ok((StatusCode::CREATED, Json(out)))
}
