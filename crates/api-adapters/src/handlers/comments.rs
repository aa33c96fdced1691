use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domains::Comment;
use serde::Deserialize;
use serde_json::{json, Value};
use services::{CommentNode, CommentPage, DEFAULT_THREAD_LIMIT};
use uuid::Uuid;

use super::PageParams;
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentBody {
    pub post_id: Uuid,
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentBody {
    pub content: String,
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<CommentPage>> {
    let page = params.request(DEFAULT_THREAD_LIMIT);
    Ok(Json(state.services.comments.list_comments(post_id, page).await?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<CreateCommentBody>,
) -> ApiResult<(StatusCode, Json<CommentNode>)> {
    let node = state
        .services
        .comments
        .create_comment(principal, body.post_id, body.parent_comment_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateCommentBody>,
) -> ApiResult<Json<Comment>> {
    Ok(Json(state.services.comments.update_comment(principal, id, &body.content).await?))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let removed = state.services.comments.delete_comment(principal, id).await?;
    Ok(Json(json!({ "message": "comment deleted", "removed": removed })))
}
