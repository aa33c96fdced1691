//! # Realtime Rooms and Events
//!
//! Room names and typed event envelopes shared between the services that
//! emit events and the transport that delivers them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// Event names as seen by clients.
pub mod names {
    pub const POST_NEW: &str = "post:new";
    pub const POST_UPDATED: &str = "post:updated";
    pub const POST_DELETED: &str = "post:deleted";
    pub const POST_VIEWED: &str = "post:viewed";
    pub const POST_VOTED: &str = "post:voted";
    pub const COMMENT_NEW: &str = "comment:new";
    pub const COMMENT_UPDATED: &str = "comment:updated";
    pub const COMMENT_DELETED: &str = "comment:deleted";
    pub const COMMENT_VOTED: &str = "comment:voted";
    pub const NOTIFICATION_NEW: &str = "notification:new";
    pub const MESSAGE_NEW: &str = "message:new";
}

/// A named subscription scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Everyone currently viewing a post: `post:<id>`
    Post(Uuid),
    /// A user's private notification room: `user:<id>`
    User(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(id) => write!(f, "post:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl FromStr for Room {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("malformed room {s:?}")))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| DomainError::validation(format!("malformed room id in {s:?}")))?;
        match kind {
            "post" => Ok(Self::Post(id)),
            "user" => Ok(Self::User(id)),
            _ => Err(DomainError::validation(format!("unknown room kind {kind:?}"))),
        }
    }
}

/// A named event with a JSON payload, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl RealtimeEvent {
    pub fn new(event: &str, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }
}
