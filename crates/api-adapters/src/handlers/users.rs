use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use domains::User;
use serde::Deserialize;
use serde_json::Value;
use services::PublicProfile;
use uuid::Uuid;

use super::done;
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::multipart::read_form;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.services.users.list_users(principal).await?))
}

pub async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<PublicProfile>>> {
    Ok(Json(state.services.users.search_users(&params.q).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PublicProfile>> {
    Ok(Json(state.services.users.get_user(id).await?))
}

/// Multipart: optional `bio` field and optional `avatar` file.
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<Json<User>> {
    let mut form = read_form(multipart).await?;
    let avatar = form.take_files("avatar").into_iter().next();
    let bio = form.fields.remove("bio");
    let user = state
        .services
        .users
        .update_profile(principal, id, bio, avatar)
        .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.services.users.delete_user(principal, id).await?;
    Ok(done("user deactivated"))
}
