use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use domains::{Category, PageRequest, PostFlags, PostQuery, PostSort, PostUpdate};
use serde::Deserialize;
use serde_json::Value;
use services::{NewPost, PostPage, PostView, DEFAULT_POST_LIMIT};
use uuid::Uuid;

use super::{done, with_captions};
use crate::error::{ApiError, ApiResult};
use crate::extract::{AuthUser, MaybeAuthUser};
use crate::multipart::read_form;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListPostsParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort: Option<PostSort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostBody {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
}

impl From<UpdatePostBody> for PostUpdate {
    fn from(body: UpdatePostBody) -> Self {
        Self {
            title: body.title,
            content: body.content,
            category: body.category,
            tags: body.tags,
        }
    }
}

fn category(raw: Option<&str>) -> Result<Option<Category>, ApiError> {
    match raw.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => Ok(Some(c.parse()?)),
        None => Ok(None),
    }
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<ListPostsParams>,
) -> ApiResult<Json<PostPage>> {
    let query = PostQuery {
        page: PageRequest::new(params.page, params.limit, DEFAULT_POST_LIMIT),
        category: category(params.category.as_deref())?,
        search: params.search,
        sort: params.sort.unwrap_or_default(),
    };
    Ok(Json(state.services.posts.list_posts(query).await?))
}

/// Multipart: `title`, `content`, `category`, `tags`, `captions` and any
/// number of `media` files.
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<PostView>)> {
    let mut form = read_form(multipart).await?;
    let files = with_captions(form.take_files("media"), form.positional("captions"));
    let new = NewPost {
        title: form.text("title").unwrap_or_default().to_string(),
        content: form.text("content").unwrap_or_default().to_string(),
        category: category(form.text("category"))?.unwrap_or_default(),
        tags: form.list("tags"),
        files,
    };
    let view = state.services.posts.create_post(principal, new).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_post(
    State(state): State<AppState>,
    MaybeAuthUser(viewer): MaybeAuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PostView>> {
    Ok(Json(state.services.posts.get_post(id, viewer).await?))
}

pub async fn update_post(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePostBody>,
) -> ApiResult<Json<PostView>> {
    Ok(Json(state.services.posts.update_post(principal, id, body.into()).await?))
}

pub async fn set_flags(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(flags): Json<PostFlags>,
) -> ApiResult<Json<PostView>> {
    Ok(Json(state.services.posts.set_flags(principal, id, flags).await?))
}

pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    state.services.posts.delete_post(principal, id).await?;
    Ok(done("post deleted"))
}
