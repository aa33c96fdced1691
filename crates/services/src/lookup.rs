//! Shared loaders used by several services.

use std::collections::HashMap;

use domains::{
    Comment, CommentRepository, DomainError, Post, PostRepository, Result, UserRepository,
    UserSummary,
};
use tracing::warn;
use uuid::Uuid;

/// A post that exists and is not soft-deleted.
pub async fn live_post(posts: &dyn PostRepository, id: Uuid) -> Result<Post> {
    posts
        .find_post(id)
        .await?
        .filter(|p| !p.is_deleted)
        .ok_or_else(|| DomainError::not_found("post", id))
}

/// A comment that exists and is not soft-deleted.
pub async fn live_comment(comments: &dyn CommentRepository, id: Uuid) -> Result<Comment> {
    comments
        .find_comment(id)
        .await?
        .filter(|c| !c.is_deleted)
        .ok_or_else(|| DomainError::not_found("comment", id))
}

/// Resolves user ids to public summaries in one store call.
pub async fn summaries(
    users: &dyn UserRepository,
    ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, UserSummary>> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(users
        .find_users(&ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u.summary()))
        .collect())
}

/// Best-effort single lookup for responses built after a commit.
pub async fn summary_of(users: &dyn UserRepository, id: Uuid) -> Option<UserSummary> {
    match users.find_user(id).await {
        Ok(user) => user.map(|u| u.summary()),
        Err(err) => {
            warn!(user_id = %id, error = %err, "author lookup failed");
            None
        }
    }
}
