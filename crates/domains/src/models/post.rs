use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::media::Media;
use super::vote::{TallyDelta, VoteTally};
use crate::error::{DomainError, Result};
use crate::pagination::PageRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Academic,
    Technology,
    Sports,
    Entertainment,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::General,
        Self::Academic,
        Self::Technology,
        Self::Sports,
        Self::Entertainment,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Academic => "academic",
            Self::Technology => "technology",
            Self::Sports => "sports",
            Self::Entertainment => "entertainment",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("invalid category {s:?}")))
    }
}

/// A top-level submission. Soft-deleted rather than removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    /// Rich text; may embed inline media references as markup
    pub content: String,
    pub author_id: Uuid,
    pub category: Category,
    pub tags: Vec<String>,
    pub media_count: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    /// Always `upvotes - downvotes`
    pub net_votes: i64,
    pub views: i64,
    /// Includes replies at every depth
    pub comment_count: i64,
    /// Bumped on every new comment; drives the "hot" sort
    pub last_activity_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn new(
        author_id: Uuid,
        title: String,
        content: String,
        category: Category,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            content,
            author_id,
            category,
            tags,
            media_count: 0,
            upvotes: 0,
            downvotes: 0,
            net_votes: 0,
            views: 0,
            comment_count: 0,
            last_activity_at: now,
            is_pinned: false,
            is_locked: false,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tally(&self) -> VoteTally {
        VoteTally {
            upvotes: self.upvotes,
            downvotes: self.downvotes,
        }
    }

    /// Applies a vote delta and re-derives `net_votes`.
    pub fn apply_tally_delta(&mut self, delta: TallyDelta) {
        self.upvotes += delta.upvotes;
        self.downvotes += delta.downvotes;
        self.net_votes = self.upvotes - self.downvotes;
    }
}

/// Partial edit by the owner or an admin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
}

/// Moderation flags; admin only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFlags {
    pub is_pinned: Option<bool>,
    pub is_locked: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSort {
    #[default]
    Newest,
    Oldest,
    Popular,
    MostViewed,
    Hot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostQuery {
    pub page: PageRequest,
    pub category: Option<Category>,
    pub search: Option<String>,
    pub sort: PostSort,
}

/// What a soft delete removed, so the caller can unlink files after commit.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDeletion {
    pub post_id: Uuid,
    pub media: Vec<Media>,
    pub comments_removed: u64,
    pub votes_removed: u64,
}

/// Minimal post reference embedded into notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub id: Uuid,
    pub title: String,
}
