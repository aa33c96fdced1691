use axum::{
    extract::{Path, Query, State},
    Json,
};
use domains::Notification;
use serde_json::{json, Value};
use services::{NotificationPage, DEFAULT_NOTIFICATION_LIMIT};
use uuid::Uuid;

use super::{done, PageParams};
use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::state::AppState;

pub async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<NotificationPage>> {
    let page = params.request(DEFAULT_NOTIFICATION_LIMIT);
    Ok(Json(state.services.notifications.list(principal, page).await?))
}

pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Value>> {
    let count = state.services.notifications.unread_count(principal).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    Ok(Json(state.services.notifications.mark_read(principal, id).await?))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Value>> {
    let updated = state.services.notifications.mark_all_read(principal).await?;
    Ok(Json(json!({ "message": "all notifications marked as read", "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.services.notifications.delete(principal, id).await?;
    Ok(done("notification deleted"))
}
