use axum::{
    extract::{Path, State},
    Json,
};
use domains::{VoteTarget, VoteType};
use serde::Deserialize;
use services::VoteOutcome;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::extract::AuthUser;
use crate::state::AppState;

/// Exactly one of `postId` / `commentId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteBody {
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(body): Json<VoteBody>,
) -> ApiResult<Json<VoteOutcome>> {
    let target = VoteTarget::from_ids(body.post_id, body.comment_id)?;
    Ok(Json(state.services.votes.cast_vote(principal, target, body.vote_type).await?))
}

#[derive(Debug, Deserialize)]
pub struct ChangeVoteBody {
    #[serde(rename = "type")]
    pub vote_type: VoteType,
}

pub async fn change_vote(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ChangeVoteBody>,
) -> ApiResult<Json<VoteOutcome>> {
    Ok(Json(state.services.votes.change_vote(principal, id, body.vote_type).await?))
}

pub async fn remove_vote(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VoteOutcome>> {
    Ok(Json(state.services.votes.remove_vote(principal, id).await?))
}
