use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::post::PostSummary;
use super::user::UserSummary;
use crate::error::{DomainError, Result};

/// Upper bound on the free-text notification message, in characters.
pub const MAX_NOTIFICATION_MESSAGE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Reply,
    Message,
    Follow,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Reply => "reply",
            Self::Message => "message",
            Self::Follow => "follow",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "like" => Ok(Self::Like),
            "comment" => Ok(Self::Comment),
            "reply" => Ok(Self::Reply),
            "message" => Ok(Self::Message),
            "follow" => Ok(Self::Follow),
            other => Err(DomainError::internal(format!("unknown notification type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub message: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to notify someone. Turned into a [`Notification`] by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub kind: NotificationKind,
    pub post_id: Option<Uuid>,
    pub comment_id: Option<Uuid>,
    pub message: Option<String>,
}

impl NewNotification {
    pub fn new(recipient_id: Uuid, sender_id: Uuid, kind: NotificationKind) -> Self {
        Self {
            recipient_id,
            sender_id,
            kind,
            post_id: None,
            comment_id: None,
            message: None,
        }
    }

    pub fn on_post(mut self, post_id: Uuid) -> Self {
        self.post_id = Some(post_id);
        self
    }

    pub fn on_comment(mut self, comment_id: Uuid) -> Self {
        self.comment_id = Some(comment_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_self_action(&self) -> bool {
        self.recipient_id == self.sender_id
    }

    pub fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            sender_id: self.sender_id,
            kind: self.kind,
            post_id: self.post_id,
            comment_id: self.comment_id,
            message: self
                .message
                .map(|m| m.chars().take(MAX_NOTIFICATION_MESSAGE).collect()),
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// Notification as pushed to clients: sender and post resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedNotification {
    #[serde(flatten)]
    pub notification: Notification,
    pub sender: Option<UserSummary>,
    pub post: Option<PostSummary>,
}
