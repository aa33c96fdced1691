use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DomainError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upvote => "upvote",
            Self::Downvote => "downvote",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upvote" => Ok(Self::Upvote),
            "downvote" => Ok(Self::Downvote),
            other => Err(DomainError::validation(format!(
                "vote type must be upvote or downvote, got {other:?}"
            ))),
        }
    }
}

/// Exactly one of post or comment. The enum makes "both" and "neither"
/// unrepresentable once a request has been accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum VoteTarget {
    Post(Uuid),
    Comment(Uuid),
}

impl VoteTarget {
    /// Builds a target from the two optional request fields.
    pub fn from_ids(post_id: Option<Uuid>, comment_id: Option<Uuid>) -> Result<Self> {
        match (post_id, comment_id) {
            (Some(post), None) => Ok(Self::Post(post)),
            (None, Some(comment)) => Ok(Self::Comment(comment)),
            _ => Err(DomainError::conflict(
                "must provide either postId or commentId, but not both",
            )),
        }
    }

    pub fn post_id(&self) -> Option<Uuid> {
        match self {
            Self::Post(id) => Some(*id),
            Self::Comment(_) => None,
        }
    }

    pub fn comment_id(&self) -> Option<Uuid> {
        match self {
            Self::Comment(id) => Some(*id),
            Self::Post(_) => None,
        }
    }
}

/// One user's vote on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target: VoteTarget,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counter pair as stored on a post or comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteTally {
    pub fn net(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

/// Signed change applied to a [`VoteTally`] in a single atomic update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyDelta {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl TallyDelta {
    fn single(vote_type: VoteType, amount: i64) -> Self {
        match vote_type {
            VoteType::Upvote => Self { upvotes: amount, downvotes: 0 },
            VoteType::Downvote => Self { upvotes: 0, downvotes: amount },
        }
    }
}

/// The three ways a vote submission can change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No vote yet: insert one.
    Create(VoteType),
    /// Same type re-submitted: toggle off.
    Remove(VoteType),
    /// Opposite type submitted: update in place.
    Flip { from: VoteType, to: VoteType },
}

impl VoteTransition {
    pub fn resolve(existing: Option<VoteType>, desired: VoteType) -> Self {
        match existing {
            None => Self::Create(desired),
            Some(current) if current == desired => Self::Remove(current),
            Some(current) => Self::Flip { from: current, to: desired },
        }
    }

    pub fn delta(&self) -> TallyDelta {
        match *self {
            Self::Create(t) => TallyDelta::single(t, 1),
            Self::Remove(t) => TallyDelta::single(t, -1),
            Self::Flip { from, to } => {
                let out = TallyDelta::single(from, -1);
                let inc = TallyDelta::single(to, 1);
                TallyDelta {
                    upvotes: out.upvotes + inc.upvotes,
                    downvotes: out.downvotes + inc.downvotes,
                }
            }
        }
    }

    /// The user's vote once the transition has been applied.
    pub fn resulting_vote(&self) -> Option<VoteType> {
        match *self {
            Self::Create(t) => Some(t),
            Self::Remove(_) => None,
            Self::Flip { to, .. } => Some(to),
        }
    }
}
