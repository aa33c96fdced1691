use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::vote::{TallyDelta, VoteTally};

/// Deepest value the informational `depth` field takes. Replies below it
/// still nest structurally, they just report depth 5.
pub const MAX_COMMENT_DEPTH: i32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    /// `None` for top-level comments
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    /// `min(parent.depth + 1, MAX_COMMENT_DEPTH)`
    pub depth: i32,
    /// Direct children only
    pub reply_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub net_votes: i64,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(post_id: Uuid, author_id: Uuid, content: String, parent: Option<&Comment>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            parent_comment_id: parent.map(|p| p.id),
            content,
            depth: Self::depth_under(parent),
            reply_count: 0,
            upvotes: 0,
            downvotes: 0,
            net_votes: 0,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn depth_under(parent: Option<&Comment>) -> i32 {
        parent.map_or(0, |p| (p.depth + 1).min(MAX_COMMENT_DEPTH))
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_comment_id.is_none()
    }

    pub fn tally(&self) -> VoteTally {
        VoteTally {
            upvotes: self.upvotes,
            downvotes: self.downvotes,
        }
    }

    pub fn apply_tally_delta(&mut self, delta: TallyDelta) {
        self.upvotes += delta.upvotes;
        self.downvotes += delta.downvotes;
        self.net_votes = self.upvotes - self.downvotes;
    }
}

/// Outcome of a cascading soft delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDeletion {
    pub comment_id: Uuid,
    pub post_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    /// The comment itself plus every descendant that was still live
    pub removed_ids: Vec<Uuid>,
}

impl CommentDeletion {
    /// Amount subtracted from the post's `comment_count`.
    pub fn removed(&self) -> u64 {
        self.removed_ids.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_clamped() {
        let post = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut parent = Comment::new(post, author, "root".into(), None);
        assert_eq!(parent.depth, 0);
        for expected in [1, 2, 3, 4, 5, 5, 5] {
            let child = Comment::new(post, author, "r".into(), Some(&parent));
            assert_eq!(child.depth, expected);
            assert_eq!(child.parent_comment_id, Some(parent.id));
            parent = child;
        }
    }
}
