use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::MANAGERS;
use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::{Group, Stream, Tariff};
use crate::services::resources::Resource;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(crud::<Group>("/groups"))
        .merge(crud::<Stream>("/streams"))
        .merge(crud::<Tariff>("/tariffs"))
}

fn crud<R: Resource>(base: &str) -> Router<AppState> {
    Router::new()
        .route(base, get(list::<R>).post(create::<R>))
        .route(
            &format!("{base}/:id"),
            get(get_one::<R>).put(update::<R>).delete(remove::<R>),
        )
}

async fn list<R: Resource>(State(st): State<AppState>, _auth: AuthUser) -> Result<Json<Vec<R>>> {
    Ok(Json(st.resources.list::<R>().await?))
}

async fn create<R: Resource>(
    State(st): State<AppState>,
    auth: AuthUser,
    Json(req): Json<R::Create>,
) -> Result<(StatusCode, Json<R>)> {
    auth.require(MANAGERS)?;
    let item = st.resources.create::<R>(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_one<R: Resource>(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<R>> {
    Ok(Json(st.resources.get::<R>(&id).await?))
}

async fn update<R: Resource>(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<R::Update>,
) -> Result<Json<R>> {
    auth.require(MANAGERS)?;
    Ok(Json(st.resources.update::<R>(&id, req).await?))
}

async fn remove<R: Resource>(
    State(st): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    auth.require(MANAGERS)?;
    st.resources.delete::<R>(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
