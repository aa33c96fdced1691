use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use services::{MessagePage, DEFAULT_MESSAGE_LIMIT};
use uuid::Uuid;

use super::PageParams;
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub content: String,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Value>> {
    let conversations = state.services.chat.list_conversations(principal).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

/// `id` is the other participant's user id.
pub async fn open_conversation(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let conversation = state.services.chat.get_or_create_conversation(principal, id).await?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<MessagePage>> {
    let page = params.request(DEFAULT_MESSAGE_LIMIT);
    Ok(Json(state.services.chat.get_messages(principal, id, page).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let message = state.services.chat.send_message(principal, id, &body.content).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Value>> {
    let unread = state.services.chat.unread_count(principal).await?;
    Ok(Json(json!({ "unreadCount": unread })))
}
