use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use domains::Media;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{done, with_captions};
use crate::error::{ApiError, ApiResult};
use crate::extract::AuthUser;
use crate::multipart::read_form;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CaptionBody {
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderBody {
    pub post_id: Uuid,
    pub media_ids: Vec<Uuid>,
}

/// Multipart: `postId`, optional `captions` and one or more `media` files.
pub async fn upload_media(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut form = read_form(multipart).await?;
    let post_id = form
        .text("postId")
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .ok_or_else(|| ApiError::bad_request("postId is required"))?;
    let files = with_captions(form.take_files("media"), form.positional("captions"));
    if files.is_empty() {
        return Err(ApiError::bad_request("no files uploaded"));
    }
    let media = state.services.media.upload_media(principal, post_id, files).await?;
    Ok((StatusCode::CREATED, Json(json!({ "media": media }))))
}

pub async fn list_media(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let media = state.services.media.list_media(post_id).await?;
    Ok(Json(json!({ "media": media })))
}

pub async fn update_caption(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CaptionBody>,
) -> ApiResult<Json<Media>> {
    Ok(Json(state.services.media.update_caption(principal, id, &body.caption).await?))
}

pub async fn delete_media(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.services.media.delete_media(principal, id).await?;
    Ok(done("media deleted"))
}

pub async fn reorder_media(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<ReorderBody>,
) -> ApiResult<Json<Value>> {
    let media = state
        .services
        .media
        .reorder_media(principal, body.post_id, body.media_ids)
        .await?;
    Ok(Json(json!({ "media": media })))
}
